//! Kernel abstraction executed by streams and graph kernel nodes.
//!
//! A kernel is ordinary Rust code that runs on a stream worker thread. It sees device memory
//! only through [`KernelContext`], which bounds-checks every access against the runtime's
//! allocations.

mod builtin;
mod registry;

use std::fmt;

use bytemuck::Pod;

pub use builtin::{
    bit_extract_u32, bit_extract_u64, bit_insert_u32, bit_insert_u64, Arith, BitExtract,
    BitInsert, BitWord, EmptyKernel, VectorAdd, VectorSquare, BIT_EXTRACT_U32, BIT_EXTRACT_U64,
    BIT_INSERT_U32, BIT_INSERT_U64, EMPTY_KERNEL, VECTOR_ADD_F32, VECTOR_ADD_I32,
    VECTOR_SQUARE_F32,
};
pub use registry::{has_kernel, kernel_by_name, list_kernels, register_kernel};

use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::DevicePtr;
use crate::runtime::Runtime;

pub const MAX_THREADS_PER_BLOCK: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// `x * y * z`, or `None` when the product does not fit in a `u64`.
    pub fn checked_count(&self) -> Option<u64> {
        (self.x as u64)
            .checked_mul(self.y as u64)?
            .checked_mul(self.z as u64)
    }

    /// Saturates at `u64::MAX`.
    pub fn count(&self) -> u64 {
        self.checked_count().unwrap_or(u64::MAX)
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaunchConfig {
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    pub fn new(grid: impl Into<Dim3>, block: impl Into<Dim3>) -> Self {
        Self {
            grid: grid.into(),
            block: block.into(),
            shared_mem_bytes: 0,
        }
    }

    /// One-dimensional launch covering at least `elements` threads.
    pub fn for_elements(elements: usize, threads_per_block: u32) -> Self {
        let threads = threads_per_block.max(1);
        let blocks = (elements as u64).div_ceil(threads as u64).max(1);
        Self::new(blocks.min(u32::MAX as u64) as u32, threads)
    }

    pub fn checked_total_threads(&self) -> Option<u64> {
        self.grid.checked_count()?.checked_mul(self.block.checked_count()?)
    }

    /// Saturates at `u64::MAX`; validated configs never get there.
    pub fn total_threads(&self) -> u64 {
        self.checked_total_threads().unwrap_or(u64::MAX)
    }

    pub(crate) fn validate(&self) -> RuntimeResult<()> {
        if self.grid.count() == 0 || self.block.count() == 0 {
            return Err(RuntimeError::invalid_value(format!(
                "launch dimensions must be nonzero (grid {:?}, block {:?})",
                self.grid, self.block
            )));
        }
        if self.block.count() > MAX_THREADS_PER_BLOCK {
            return Err(RuntimeError::invalid_value(format!(
                "{} threads per block exceeds {MAX_THREADS_PER_BLOCK}",
                self.block.count()
            )));
        }
        let fits = self
            .checked_total_threads()
            .is_some_and(|threads| usize::try_from(threads).is_ok());
        if !fits {
            return Err(RuntimeError::invalid_value(format!(
                "launch of {:?} blocks of {:?} threads overflows the thread count",
                self.grid, self.block
            )));
        }
        Ok(())
    }
}

/// Kernel argument passed by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Ptr(DevicePtr),
    I32(i32),
    U32(u32),
    U64(u64),
    F32(f32),
    Usize(usize),
}

impl From<DevicePtr> for KernelArg {
    fn from(value: DevicePtr) -> Self {
        KernelArg::Ptr(value)
    }
}

impl From<i32> for KernelArg {
    fn from(value: i32) -> Self {
        KernelArg::I32(value)
    }
}

impl From<u32> for KernelArg {
    fn from(value: u32) -> Self {
        KernelArg::U32(value)
    }
}

impl From<u64> for KernelArg {
    fn from(value: u64) -> Self {
        KernelArg::U64(value)
    }
}

impl From<f32> for KernelArg {
    fn from(value: f32) -> Self {
        KernelArg::F32(value)
    }
}

impl From<usize> for KernelArg {
    fn from(value: usize) -> Self {
        KernelArg::Usize(value)
    }
}

/// Device-side view handed to a running kernel.
pub struct KernelContext<'a> {
    runtime: &'a Runtime,
    config: LaunchConfig,
    kernel: &'a str,
}

impl<'a> KernelContext<'a> {
    pub(crate) fn new(runtime: &'a Runtime, config: LaunchConfig, kernel: &'a str) -> Self {
        Self {
            runtime,
            config,
            kernel,
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn total_threads(&self) -> usize {
        usize::try_from(self.config.total_threads()).unwrap_or(usize::MAX)
    }

    pub fn warp_size(&self) -> u32 {
        self.runtime.config().warp_size
    }

    pub fn read<T: Pod>(&self, ptr: DevicePtr, count: usize) -> RuntimeResult<Vec<T>> {
        self.runtime
            .memory()
            .read_pod(ptr, count)
            .map_err(|err| self.fault(err))
    }

    pub fn write<T: Pod>(&self, ptr: DevicePtr, values: &[T]) -> RuntimeResult<()> {
        self.runtime
            .memory()
            .write_pod(ptr, values)
            .map_err(|err| self.fault(err))
    }

    fn fault(&self, err: RuntimeError) -> RuntimeError {
        RuntimeError::launch_failure(format!("{}: {err}", self.kernel))
    }

    pub fn arg_ptr(&self, args: &[KernelArg], index: usize) -> RuntimeResult<DevicePtr> {
        match args.get(index) {
            Some(KernelArg::Ptr(ptr)) => Ok(*ptr),
            other => Err(self.bad_arg(index, "pointer", other)),
        }
    }

    /// Integer argument widened to `usize`.
    pub fn arg_len(&self, args: &[KernelArg], index: usize) -> RuntimeResult<usize> {
        match args.get(index) {
            Some(KernelArg::Usize(value)) => Ok(*value),
            Some(KernelArg::U64(value)) => Ok(*value as usize),
            Some(KernelArg::U32(value)) => Ok(*value as usize),
            Some(KernelArg::I32(value)) if *value >= 0 => Ok(*value as usize),
            other => Err(self.bad_arg(index, "length", other)),
        }
    }

    fn bad_arg(&self, index: usize, expected: &str, found: Option<&KernelArg>) -> RuntimeError {
        RuntimeError::launch_failure(format!(
            "{}: argument {index} should be a {expected}, found {found:?}",
            self.kernel
        ))
    }
}

/// Host implementation of a device kernel.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, ctx: &KernelContext<'_>, args: &[KernelArg]) -> RuntimeResult<()>;
}

impl fmt::Debug for dyn Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel").field("name", &self.name()).finish()
    }
}
