//! Parameter validation shared by graph construction, instance updates and stream submission.

use std::sync::Arc;

use super::exec::ExecPlan;
use super::node::{
    HostNodeParams, KernelNodeParams, Memcpy1DParams, MemcpyFromSymbolParams,
    MemcpyToSymbolParams, MemsetParams, NodeParams,
};
use super::op::{Fill, Op};
use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::{AllocationKind, DevicePtr, Direction, MemcpyKind, PointerAttributes};
use crate::runtime::Runtime;

/// Where a copy's memory lives, as seen by instance updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CopyFootprint {
    pub(crate) direction: Direction,
    src_device: Option<u32>,
    dst_device: Option<u32>,
}

fn device_of(attr: &PointerAttributes) -> Option<u32> {
    (attr.kind == AllocationKind::Device).then_some(attr.device)
}

impl CopyFootprint {
    /// An update may not change the direction class or move device memory across devices.
    pub(crate) fn check_update(&self, next: &CopyFootprint) -> RuntimeResult<()> {
        if self.direction != next.direction {
            return Err(RuntimeError::invalid_value(format!(
                "copy direction cannot change from {:?} to {:?}",
                self.direction, next.direction
            )));
        }
        let moved = |old: Option<u32>, new: Option<u32>| {
            matches!((old, new), (Some(a), Some(b)) if a != b)
        };
        if moved(self.src_device, next.src_device) || moved(self.dst_device, next.dst_device) {
            return Err(RuntimeError::invalid_direction(
                "copy memory cannot move to a different device",
            ));
        }
        Ok(())
    }
}

/// Copy whose arguments passed shape checks; direction legality is still open.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CopyRequest {
    dst: DevicePtr,
    src: DevicePtr,
    bytes: usize,
    kind: MemcpyKind,
    src_attr: PointerAttributes,
    dst_attr: PointerAttributes,
}

impl CopyRequest {
    pub(crate) fn footprint(&self) -> CopyFootprint {
        CopyFootprint {
            direction: self
                .kind
                .direction(self.src_attr.memory_kind(), self.dst_attr.memory_kind()),
            src_device: device_of(&self.src_attr),
            dst_device: device_of(&self.dst_attr),
        }
    }

    pub(crate) fn resolve(&self) -> RuntimeResult<Op> {
        self.kind
            .resolve(self.src_attr.memory_kind(), self.dst_attr.memory_kind())?;
        Ok(Op::Copy {
            dst: self.dst,
            src: self.src,
            bytes: self.bytes,
        })
    }
}

fn non_null(ptr: DevicePtr, what: &str) -> RuntimeResult<()> {
    if ptr.is_null() {
        return Err(RuntimeError::invalid_value(format!("{what} pointer is null")));
    }
    Ok(())
}

fn allowed_kind(kind: MemcpyKind, allowed: &[MemcpyKind], what: &str) -> RuntimeResult<()> {
    if !allowed.contains(&kind) {
        return Err(RuntimeError::invalid_direction(format!(
            "{kind:?} is not a valid direction for {what}"
        )));
    }
    Ok(())
}

pub(crate) fn memcpy_1d(runtime: &Runtime, params: &Memcpy1DParams) -> RuntimeResult<CopyRequest> {
    non_null(params.dst, "destination")?;
    non_null(params.src, "source")?;
    if params.bytes == 0 {
        return Err(RuntimeError::invalid_value("zero-byte memcpy"));
    }
    let memory = runtime.memory();
    Ok(CopyRequest {
        dst: params.dst,
        src: params.src,
        bytes: params.bytes,
        kind: params.kind,
        dst_attr: memory.check_range(params.dst, params.bytes)?,
        src_attr: memory.check_range(params.src, params.bytes)?,
    })
}

pub(crate) fn memcpy_to_symbol(
    runtime: &Runtime,
    params: &MemcpyToSymbolParams,
) -> RuntimeResult<CopyRequest> {
    non_null(params.src, "source")?;
    let symbol = runtime.symbol_info(params.symbol)?;
    let dst = symbol.window(params.bytes, params.offset)?;
    allowed_kind(
        params.kind,
        &[
            MemcpyKind::HostToDevice,
            MemcpyKind::DeviceToDevice,
            MemcpyKind::Default,
        ],
        "a copy to a symbol",
    )?;
    let memory = runtime.memory();
    Ok(CopyRequest {
        dst,
        src: params.src,
        bytes: params.bytes,
        kind: params.kind,
        src_attr: memory.check_range(params.src, params.bytes)?,
        dst_attr: memory.check_range(dst, params.bytes)?,
    })
}

pub(crate) fn memcpy_from_symbol(
    runtime: &Runtime,
    params: &MemcpyFromSymbolParams,
) -> RuntimeResult<CopyRequest> {
    non_null(params.dst, "destination")?;
    let symbol = runtime.symbol_info(params.symbol)?;
    let src = symbol.window(params.bytes, params.offset)?;
    allowed_kind(
        params.kind,
        &[
            MemcpyKind::DeviceToHost,
            MemcpyKind::DeviceToDevice,
            MemcpyKind::Default,
        ],
        "a copy from a symbol",
    )?;
    let memory = runtime.memory();
    Ok(CopyRequest {
        dst: params.dst,
        src,
        bytes: params.bytes,
        kind: params.kind,
        src_attr: memory.check_range(src, params.bytes)?,
        dst_attr: memory.check_range(params.dst, params.bytes)?,
    })
}

/// Shape checks for the three copy node kinds; `None` for every other kind.
pub(crate) fn copy_request(
    runtime: &Runtime,
    params: &NodeParams,
) -> Option<RuntimeResult<CopyRequest>> {
    match params {
        NodeParams::Memcpy1D(params) => Some(memcpy_1d(runtime, params)),
        NodeParams::MemcpyToSymbol(params) => Some(memcpy_to_symbol(runtime, params)),
        NodeParams::MemcpyFromSymbol(params) => Some(memcpy_from_symbol(runtime, params)),
        _ => None,
    }
}

pub(crate) fn memset(runtime: &Runtime, params: &MemsetParams) -> RuntimeResult<Op> {
    non_null(params.dst, "destination")?;
    let element_size = params.element_size as usize;
    if !matches!(element_size, 1 | 2 | 4) {
        return Err(RuntimeError::invalid_value(format!(
            "memset element size {element_size} is not 1, 2 or 4"
        )));
    }
    if params.width == 0 || params.height == 0 {
        return Err(RuntimeError::invalid_value("memset extent is empty"));
    }
    let row_bytes = params
        .width
        .checked_mul(element_size)
        .ok_or_else(|| RuntimeError::invalid_value("memset row overflows"))?;
    if params.height > 1 && params.pitch < row_bytes {
        return Err(RuntimeError::invalid_value(format!(
            "pitch {} is smaller than the {row_bytes} byte row",
            params.pitch
        )));
    }
    let span = (params.height - 1)
        .checked_mul(params.pitch)
        .and_then(|rows| rows.checked_add(row_bytes))
        .ok_or_else(|| RuntimeError::invalid_value("memset extent overflows"))?;
    runtime.memory().check_range(params.dst, span)?;

    let mut pattern = [0u8; 4];
    pattern[..element_size].copy_from_slice(&params.value.to_le_bytes()[..element_size]);
    Ok(Op::Fill(Fill {
        dst: params.dst,
        pattern,
        element_size,
        width: params.width,
        height: params.height,
        pitch: params.pitch,
    }))
}

pub(crate) fn kernel(params: &KernelNodeParams) -> RuntimeResult<Op> {
    let kernel = params
        .kernel
        .as_ref()
        .ok_or_else(|| RuntimeError::invalid_value("kernel node has no kernel"))?;
    params.config.validate()?;
    Ok(Op::Kernel {
        kernel: Arc::clone(kernel),
        config: params.config,
        args: params.args.clone(),
    })
}

pub(crate) fn host(params: &HostNodeParams) -> RuntimeResult<Op> {
    params
        .func
        .clone()
        .map(Op::Host)
        .ok_or_else(|| RuntimeError::invalid_value("host node has no callback"))
}

pub(crate) struct Compiled {
    pub(crate) op: Op,
    pub(crate) footprint: Option<CopyFootprint>,
}

fn resolved(request: CopyRequest) -> RuntimeResult<Compiled> {
    Ok(Compiled {
        op: request.resolve()?,
        footprint: Some(request.footprint()),
    })
}

/// Validates `params` completely and resolves them into an executable op.
pub(crate) fn compile(runtime: &Runtime, params: &NodeParams) -> RuntimeResult<Compiled> {
    let op = match params {
        NodeParams::Memcpy1D(params) => return resolved(memcpy_1d(runtime, params)?),
        NodeParams::MemcpyToSymbol(params) => return resolved(memcpy_to_symbol(runtime, params)?),
        NodeParams::MemcpyFromSymbol(params) => {
            return resolved(memcpy_from_symbol(runtime, params)?)
        }
        NodeParams::Empty => Op::Empty,
        NodeParams::Host(params) => host(params)?,
        NodeParams::Memset(params) => memset(runtime, params)?,
        NodeParams::Kernel(params) => kernel(params)?,
        NodeParams::ChildGraph(graph) => Op::Graph(Arc::new(ExecPlan::build(graph)?)),
    };
    Ok(Compiled {
        op,
        footprint: None,
    })
}
