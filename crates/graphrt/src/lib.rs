//! Host-side task-graph runtime.
//!
//! Work is described either imperatively on [`Stream`]s or as a [`Graph`] of nodes that is
//! instantiated into a [`GraphExec`] and launched. Streams can also be captured into graphs.
//! Device memory and kernels are simulated on the host.

mod config;
mod device;
mod env;
mod error;
mod event;
pub mod graph;
pub mod kernels;
pub mod memory;
mod runtime;
mod stream;
mod symbol;

pub use config::RuntimeConfig;
pub use device::{DeviceGuard, DeviceProperties};
pub use error::{ErrorCode, RuntimeError, RuntimeResult};
pub use event::Event;
pub use graph::{
    CaptureMode, CaptureStatus, Graph, GraphExec, GraphId, GraphNode, HostCallback,
    HostNodeParams, KernelNodeParams, Memcpy1DParams, MemcpyFromSymbolParams,
    MemcpyToSymbolParams, MemsetParams, NodeKind, NodeParams,
};
pub use kernels::{Dim3, Kernel, KernelArg, KernelContext, LaunchConfig};
pub use memory::{
    AllocationKind, DeviceBuffer, DevicePtr, Direction, MemcpyKind, MemoryKind, PointerAttributes,
};
pub use runtime::Runtime;
pub use stream::Stream;
pub use symbol::{SymbolHandle, SymbolInfo};
