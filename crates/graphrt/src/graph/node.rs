use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Graph;
use crate::kernels::{Kernel, KernelArg, LaunchConfig};
use crate::memory::{DevicePtr, MemcpyKind};
use crate::symbol::SymbolHandle;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a graph. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn fresh() -> Self {
        GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        GraphId(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Handle of a node: the owning graph plus a slot that is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphNode {
    pub(crate) graph: GraphId,
    pub(crate) slot: u32,
}

impl GraphNode {
    pub const fn from_parts(graph: GraphId, slot: u32) -> Self {
        Self { graph, slot }
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Kernel = 0,
    Memcpy = 1,
    Memset = 2,
    Host = 3,
    ChildGraph = 4,
    Empty = 5,
    MemcpyFromSymbol = 6,
    MemcpyToSymbol = 7,
}

impl NodeKind {
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Copy nodes carry a direction class that instance updates must preserve.
    pub fn is_copy(self) -> bool {
        matches!(
            self,
            NodeKind::Memcpy | NodeKind::MemcpyFromSymbol | NodeKind::MemcpyToSymbol
        )
    }
}

/// Host callback shared between a graph, its clones and its instances.
#[derive(Clone)]
pub struct HostCallback(Arc<dyn Fn() + Send + Sync>);

impl HostCallback {
    pub fn new(func: impl Fn() + Send + Sync + 'static) -> Self {
        HostCallback(Arc::new(func))
    }

    pub fn call(&self) {
        (self.0)()
    }

    pub fn ptr_eq(&self, other: &HostCallback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostCallback(..)")
    }
}

/// `Default` yields the uninitialised record, which every host-node operation rejects.
#[derive(Debug, Clone, Default)]
pub struct HostNodeParams {
    pub func: Option<HostCallback>,
}

impl HostNodeParams {
    pub fn new(func: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            func: Some(HostCallback::new(func)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memcpy1DParams {
    pub dst: DevicePtr,
    pub src: DevicePtr,
    pub bytes: usize,
    pub kind: MemcpyKind,
}

impl Memcpy1DParams {
    pub fn new(dst: DevicePtr, src: DevicePtr, bytes: usize, kind: MemcpyKind) -> Self {
        Self {
            dst,
            src,
            bytes,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemcpyToSymbolParams {
    pub symbol: SymbolHandle,
    pub src: DevicePtr,
    pub bytes: usize,
    pub offset: usize,
    pub kind: MemcpyKind,
}

impl MemcpyToSymbolParams {
    pub fn new(
        symbol: SymbolHandle,
        src: DevicePtr,
        bytes: usize,
        offset: usize,
        kind: MemcpyKind,
    ) -> Self {
        Self {
            symbol,
            src,
            bytes,
            offset,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemcpyFromSymbolParams {
    pub dst: DevicePtr,
    pub symbol: SymbolHandle,
    pub bytes: usize,
    pub offset: usize,
    pub kind: MemcpyKind,
}

impl MemcpyFromSymbolParams {
    pub fn new(
        dst: DevicePtr,
        symbol: SymbolHandle,
        bytes: usize,
        offset: usize,
        kind: MemcpyKind,
    ) -> Self {
        Self {
            dst,
            symbol,
            bytes,
            offset,
            kind,
        }
    }
}

/// Two-dimensional fill: `height` rows of `width` elements, rows `pitch` bytes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemsetParams {
    pub dst: DevicePtr,
    pub value: u32,
    pub element_size: u32,
    pub width: usize,
    pub height: usize,
    pub pitch: usize,
}

impl MemsetParams {
    fn linear(dst: DevicePtr, value: u32, element_size: u32, count: usize) -> Self {
        Self {
            dst,
            value,
            element_size,
            width: count,
            height: 1,
            pitch: 0,
        }
    }

    pub fn d8(dst: DevicePtr, value: u8, count: usize) -> Self {
        Self::linear(dst, value as u32, 1, count)
    }

    pub fn d16(dst: DevicePtr, value: u16, count: usize) -> Self {
        Self::linear(dst, value as u32, 2, count)
    }

    pub fn d32(dst: DevicePtr, value: u32, count: usize) -> Self {
        Self::linear(dst, value, 4, count)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KernelNodeParams {
    pub kernel: Option<Arc<dyn Kernel>>,
    pub config: LaunchConfig,
    pub args: Vec<KernelArg>,
}

impl KernelNodeParams {
    pub fn new(kernel: Arc<dyn Kernel>, config: LaunchConfig, args: Vec<KernelArg>) -> Self {
        Self {
            kernel: Some(kernel),
            config,
            args,
        }
    }
}

/// Kind-specific parameters of a node.
#[derive(Debug, Clone)]
pub enum NodeParams {
    Empty,
    Host(HostNodeParams),
    Memcpy1D(Memcpy1DParams),
    MemcpyToSymbol(MemcpyToSymbolParams),
    MemcpyFromSymbol(MemcpyFromSymbolParams),
    Memset(MemsetParams),
    Kernel(KernelNodeParams),
    ChildGraph(Graph),
}

impl NodeParams {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeParams::Empty => NodeKind::Empty,
            NodeParams::Host(_) => NodeKind::Host,
            NodeParams::Memcpy1D(_) => NodeKind::Memcpy,
            NodeParams::MemcpyToSymbol(_) => NodeKind::MemcpyToSymbol,
            NodeParams::MemcpyFromSymbol(_) => NodeKind::MemcpyFromSymbol,
            NodeParams::Memset(_) => NodeKind::Memset,
            NodeParams::Kernel(_) => NodeKind::Kernel,
            NodeParams::ChildGraph(_) => NodeKind::ChildGraph,
        }
    }
}

impl From<HostNodeParams> for NodeParams {
    fn from(params: HostNodeParams) -> Self {
        NodeParams::Host(params)
    }
}

impl From<Memcpy1DParams> for NodeParams {
    fn from(params: Memcpy1DParams) -> Self {
        NodeParams::Memcpy1D(params)
    }
}

impl From<MemcpyToSymbolParams> for NodeParams {
    fn from(params: MemcpyToSymbolParams) -> Self {
        NodeParams::MemcpyToSymbol(params)
    }
}

impl From<MemcpyFromSymbolParams> for NodeParams {
    fn from(params: MemcpyFromSymbolParams) -> Self {
        NodeParams::MemcpyFromSymbol(params)
    }
}

impl From<MemsetParams> for NodeParams {
    fn from(params: MemsetParams) -> Self {
        NodeParams::Memset(params)
    }
}

impl From<KernelNodeParams> for NodeParams {
    fn from(params: KernelNodeParams) -> Self {
        NodeParams::Kernel(params)
    }
}
