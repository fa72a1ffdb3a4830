//! Task graphs: construction, instantiation and stream capture.

pub(crate) mod capture;
mod dag;
mod exec;
mod node;
pub(crate) mod op;
pub(crate) mod validate;

pub use capture::{CaptureMode, CaptureStatus};
pub use dag::Graph;
pub use exec::GraphExec;
pub use node::{
    GraphId, GraphNode, HostCallback, HostNodeParams, KernelNodeParams, Memcpy1DParams,
    MemcpyFromSymbolParams, MemcpyToSymbolParams, MemsetParams, NodeKind, NodeParams,
};
