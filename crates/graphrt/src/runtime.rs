//! Process-level runtime handle: devices, memory, symbols and synchronous operations.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, Weak};

use bytemuck::Pod;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::device::{self, DeviceGuard, DeviceProperties};
use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::capture::CaptureSession;
use crate::graph::op::Op;
use crate::graph::{
    validate, Graph, Memcpy1DParams, MemcpyFromSymbolParams, MemcpyToSymbolParams, MemsetParams,
};
use crate::kernels::{Kernel, KernelArg, LaunchConfig, MAX_THREADS_PER_BLOCK};
use crate::memory::{AllocationKind, DevicePtr, MemcpyKind, MemoryPool, PointerAttributes};
use crate::stream::{self, Stream, StreamShared};
use crate::symbol::{SymbolHandle, SymbolInfo, SymbolTable};

struct RuntimeInner {
    config: RuntimeConfig,
    memory: MemoryPool,
    symbols: RwLock<SymbolTable>,
    streams: Mutex<Vec<Weak<StreamShared>>>,
    captures: Mutex<Vec<Weak<CaptureSession>>>,
}

/// Cheaply cloneable handle to one simulated machine.
///
/// Every graph, stream and buffer keeps the runtime alive. The synchronous operations
/// (`memcpy`, `memset_*`, `launch_kernel`, symbol copies) behave like the legacy default
/// stream: they wait for all streams first and then run on the calling thread.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Runtime");
        out.field("config", &self.inner.config);
        match self.inner.memory.live_allocations() {
            Ok(count) => out.field("allocations", &count),
            Err(err) => out.field("allocations", &err),
        };
        out.finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime configured from the `GRAPHRT_*` environment variables.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::from_env())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let config = RuntimeConfig {
            device_count: config.device_count.max(1),
            ..config
        };
        debug!(
            devices = config.device_count,
            warp_size = config.warp_size,
            memory = config.device_memory_bytes,
            "runtime created"
        );
        Self {
            inner: Arc::new(RuntimeInner {
                memory: MemoryPool::new(config.device_count, config.device_memory_bytes),
                config,
                symbols: RwLock::new(SymbolTable::default()),
                streams: Mutex::new(Vec::new()),
                captures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn memory(&self) -> &MemoryPool {
        &self.inner.memory
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Devices

    pub fn device_count(&self) -> usize {
        self.inner.config.device_count
    }

    fn check_device(&self, ordinal: u32) -> RuntimeResult<()> {
        if ordinal as usize >= self.device_count() {
            return Err(RuntimeError::invalid_device(format!(
                "device {ordinal} of {}",
                self.device_count()
            )));
        }
        Ok(())
    }

    /// Selects the device used by allocations on the calling thread.
    pub fn set_device(&self, ordinal: u32) -> RuntimeResult<()> {
        self.check_device(ordinal)?;
        device::set_current(ordinal);
        Ok(())
    }

    pub fn current_device(&self) -> u32 {
        device::current()
    }

    /// Makes `ordinal` current until the returned guard is dropped.
    pub fn device_scope(&self, ordinal: u32) -> RuntimeResult<DeviceGuard> {
        self.check_device(ordinal)?;
        Ok(DeviceGuard::switch(ordinal))
    }

    pub fn device_properties(&self, ordinal: u32) -> RuntimeResult<DeviceProperties> {
        self.check_device(ordinal)?;
        let config = &self.inner.config;
        Ok(DeviceProperties {
            name: format!("graphrt simulated device {ordinal}"),
            ordinal,
            warp_size: config.warp_size,
            multiprocessor_count: config.multiprocessor_count,
            max_threads_per_block: MAX_THREADS_PER_BLOCK as u32,
            total_memory: config.device_memory_bytes,
        })
    }

    // Memory

    /// Device memory on the current device. Zero bytes yields the null pointer.
    pub fn malloc(&self, bytes: usize) -> RuntimeResult<DevicePtr> {
        let device = self.current_device();
        self.check_device(device)?;
        self.inner
            .memory
            .allocate(bytes, AllocationKind::Device, device)
    }

    /// Page-locked host memory.
    pub fn host_malloc(&self, bytes: usize) -> RuntimeResult<DevicePtr> {
        self.inner
            .memory
            .allocate(bytes, AllocationKind::Pinned, self.current_device())
    }

    pub fn malloc_managed(&self, bytes: usize) -> RuntimeResult<DevicePtr> {
        self.inner
            .memory
            .allocate(bytes, AllocationKind::Managed, self.current_device())
    }

    /// Ordinary host memory, the stand-in for a plain `malloc`.
    pub fn alloc_pageable(&self, bytes: usize) -> RuntimeResult<DevicePtr> {
        self.inner
            .memory
            .allocate(bytes, AllocationKind::Pageable, self.current_device())
    }

    pub fn alloc(&self, kind: AllocationKind, bytes: usize) -> RuntimeResult<DevicePtr> {
        match kind {
            AllocationKind::Device => self.malloc(bytes),
            AllocationKind::Pinned => self.host_malloc(bytes),
            AllocationKind::Managed => self.malloc_managed(bytes),
            AllocationKind::Pageable => self.alloc_pageable(bytes),
        }
    }

    pub fn free(&self, ptr: DevicePtr) -> RuntimeResult<()> {
        if self
            .inner
            .symbols
            .read()
            .map_err(|_| RuntimeError::poisoned("symbol table"))?
            .addresses()
            .contains(&ptr)
        {
            return Err(RuntimeError::invalid_value(format!(
                "{ptr} is symbol storage and cannot be freed"
            )));
        }
        self.inner.memory.free(ptr)
    }

    pub fn pointer_attributes(&self, ptr: DevicePtr) -> RuntimeResult<PointerAttributes> {
        if ptr.is_null() {
            return Err(RuntimeError::invalid_value("null pointer"));
        }
        self.inner.memory.attributes(ptr)
    }

    /// Host-side read of `count` elements. Does not wait for in-flight stream work.
    pub fn read<T: Pod>(&self, ptr: DevicePtr, count: usize) -> RuntimeResult<Vec<T>> {
        self.inner.memory.read_pod(ptr, count)
    }

    /// Host-side write. Does not wait for in-flight stream work.
    pub fn write<T: Pod>(&self, ptr: DevicePtr, values: &[T]) -> RuntimeResult<()> {
        self.inner.memory.write_pod(ptr, values)
    }

    pub fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
        kind: MemcpyKind,
    ) -> RuntimeResult<()> {
        let op = validate::memcpy_1d(self, &Memcpy1DParams::new(dst, src, bytes, kind))?
            .resolve()?;
        self.run_blocking(op)
    }

    pub fn memset_d8(&self, dst: DevicePtr, value: u8, count: usize) -> RuntimeResult<()> {
        self.memset(MemsetParams::d8(dst, value, count))
    }

    pub fn memset_d16(&self, dst: DevicePtr, value: u16, count: usize) -> RuntimeResult<()> {
        self.memset(MemsetParams::d16(dst, value, count))
    }

    pub fn memset_d32(&self, dst: DevicePtr, value: u32, count: usize) -> RuntimeResult<()> {
        self.memset(MemsetParams::d32(dst, value, count))
    }

    pub fn memset(&self, params: MemsetParams) -> RuntimeResult<()> {
        let op = validate::memset(self, &params)?;
        self.run_blocking(op)
    }

    // Symbols

    /// Registers a device global named `name` initialised with `init`.
    pub fn register_symbol<T: Pod>(
        &self,
        name: &str,
        init: &[T],
        constant: bool,
    ) -> RuntimeResult<SymbolHandle> {
        let bytes: &[u8] = bytemuck::cast_slice(init);
        if bytes.is_empty() {
            return Err(RuntimeError::invalid_value(format!("symbol {name} is empty")));
        }
        let mut symbols = self
            .inner
            .symbols
            .write()
            .map_err(|_| RuntimeError::poisoned("symbol table"))?;
        if symbols.contains_name(name) {
            return Err(RuntimeError::invalid_value(format!(
                "symbol {name} is already registered"
            )));
        }
        let address = self
            .inner
            .memory
            .allocate(bytes.len(), AllocationKind::Device, 0)?;
        self.inner.memory.write(address, bytes)?;
        let handle = symbols.insert(SymbolInfo {
            name: name.to_owned(),
            address,
            size: bytes.len(),
            constant,
        });
        debug!(symbol = name, size = bytes.len(), constant, "symbol registered");
        Ok(handle)
    }

    fn symbols(&self) -> RuntimeResult<RwLockReadGuard<'_, SymbolTable>> {
        self.inner
            .symbols
            .read()
            .map_err(|_| RuntimeError::poisoned("symbol table"))
    }

    pub fn symbol(&self, name: &str) -> RuntimeResult<SymbolHandle> {
        self.symbols()?
            .lookup(name)
            .ok_or_else(|| RuntimeError::invalid_symbol(format!("no symbol named {name}")))
    }

    pub(crate) fn symbol_info(&self, handle: SymbolHandle) -> RuntimeResult<SymbolInfo> {
        self.symbols()?.get(handle).cloned()
    }

    pub fn symbol_address(&self, handle: SymbolHandle) -> RuntimeResult<DevicePtr> {
        Ok(self.symbols()?.get(handle)?.address)
    }

    pub fn symbol_size(&self, handle: SymbolHandle) -> RuntimeResult<usize> {
        Ok(self.symbols()?.get(handle)?.size)
    }

    pub fn memcpy_to_symbol(
        &self,
        symbol: SymbolHandle,
        src: DevicePtr,
        bytes: usize,
        offset: usize,
        kind: MemcpyKind,
    ) -> RuntimeResult<()> {
        let params = MemcpyToSymbolParams::new(symbol, src, bytes, offset, kind);
        let op = validate::memcpy_to_symbol(self, &params)?.resolve()?;
        self.run_blocking(op)
    }

    pub fn memcpy_from_symbol(
        &self,
        dst: DevicePtr,
        symbol: SymbolHandle,
        bytes: usize,
        offset: usize,
        kind: MemcpyKind,
    ) -> RuntimeResult<()> {
        let params = MemcpyFromSymbolParams::new(dst, symbol, bytes, offset, kind);
        let op = validate::memcpy_from_symbol(self, &params)?.resolve()?;
        self.run_blocking(op)
    }

    // Execution

    pub fn launch_kernel(
        &self,
        kernel: &Arc<dyn Kernel>,
        config: LaunchConfig,
        args: &[KernelArg],
    ) -> RuntimeResult<()> {
        config.validate()?;
        self.run_blocking(Op::Kernel {
            kernel: Arc::clone(kernel),
            config,
            args: args.to_vec(),
        })
    }

    fn run_blocking(&self, op: Op) -> RuntimeResult<()> {
        self.device_synchronize()?;
        op.execute(self)
    }

    /// Waits for every live stream and reports the first sticky error among them.
    pub fn device_synchronize(&self) -> RuntimeResult<()> {
        if stream::current_worker().is_some() {
            return Err(RuntimeError::illegal_state(
                "device synchronisation from a stream callback",
            ));
        }
        self.reject_if_capturing()?;
        let streams: Vec<Arc<StreamShared>> = {
            let mut registry = self
                .inner
                .streams
                .lock()
                .map_err(|_| RuntimeError::poisoned("stream registry"))?;
            registry.retain(|stream| stream.strong_count() > 0);
            registry.iter().filter_map(Weak::upgrade).collect()
        };
        let mut first = None;
        for stream in streams {
            if let Err(err) = stream.wait_idle() {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn reject_if_capturing(&self) -> RuntimeResult<()> {
        let mut captures = self
            .inner
            .captures
            .lock()
            .map_err(|_| RuntimeError::poisoned("capture registry"))?;
        captures.retain(|session| {
            session
                .upgrade()
                .is_some_and(|session| session.is_active())
        });
        let mut conflict = false;
        for session in captures.iter().filter_map(Weak::upgrade) {
            if session.forbids_sync() {
                session.invalidate();
                conflict = true;
            }
        }
        if conflict {
            return Err(RuntimeError::capture_unsupported(
                "device synchronisation during stream capture",
            ));
        }
        Ok(())
    }

    pub(crate) fn register_stream(&self, stream: &Arc<StreamShared>) -> RuntimeResult<()> {
        let mut registry = self
            .inner
            .streams
            .lock()
            .map_err(|_| RuntimeError::poisoned("stream registry"))?;
        registry.retain(|stream| stream.strong_count() > 0);
        registry.push(Arc::downgrade(stream));
        Ok(())
    }

    pub(crate) fn register_capture(&self, session: &Arc<CaptureSession>) -> RuntimeResult<()> {
        self.inner
            .captures
            .lock()
            .map_err(|_| RuntimeError::poisoned("capture registry"))?
            .push(Arc::downgrade(session));
        Ok(())
    }

    // Factories

    pub fn create_graph(&self) -> Graph {
        Graph::new(self)
    }

    pub fn create_stream(&self) -> RuntimeResult<Stream> {
        Stream::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    fn runtime() -> Runtime {
        Runtime::with_config(RuntimeConfig::default().with_device_count(2))
    }

    #[test]
    fn set_device_rejects_unknown_ordinals() {
        let rt = runtime();
        assert_eq!(
            rt.set_device(2).map_err(|e| e.code()),
            Err(ErrorCode::InvalidDevice)
        );
        let guard = rt.device_scope(1).expect("device 1");
        assert_eq!(rt.current_device(), 1);
        let ptr = rt.malloc(64).expect("alloc");
        assert_eq!(rt.pointer_attributes(ptr).expect("attrs").device, 1);
        drop(guard);
        assert_eq!(rt.current_device(), 0);
    }

    #[test]
    fn duplicate_symbol_names_are_rejected() {
        let rt = runtime();
        rt.register_symbol("answer", &[42u32], true).expect("first");
        let err = rt.register_symbol("answer", &[1u32], false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidValue);
        let handle = rt.symbol("answer").expect("lookup");
        assert_eq!(rt.symbol_size(handle).expect("size"), 4);
    }

    #[test]
    fn symbol_storage_cannot_be_freed() {
        let rt = runtime();
        let handle = rt.register_symbol("table", &[0u8; 16], false).expect("symbol");
        let address = rt.symbol_address(handle).expect("address");
        assert_eq!(rt.free(address).unwrap_err().code(), ErrorCode::InvalidValue);
    }

    #[test]
    fn synchronous_memcpy_checks_direction() {
        let rt = runtime();
        let host = rt.alloc_pageable(16).expect("host");
        let dev = rt.malloc(16).expect("device");
        rt.write(host, &[7u8; 16]).expect("write");
        rt.memcpy(dev, host, 16, MemcpyKind::HostToDevice).expect("h2d");
        let err = rt
            .memcpy(dev, host, 16, MemcpyKind::DeviceToHost)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMemcpyDirection);
        assert_eq!(rt.read::<u8>(dev, 16).expect("read"), vec![7u8; 16]);
    }
}
