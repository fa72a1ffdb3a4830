//! C ABI over the process-wide graphrt runtime.
//!
//! Every entry point returns a raw [`ErrorCode`]. Graphs, instances and streams are opaque
//! boxed handles; nodes are packed into a `u64` where zero is the null node. Device pointers
//! and symbols travel as their raw `u64` values.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};

use graphrt::kernels::kernel_by_name;
use graphrt::{
    DevicePtr, Dim3, ErrorCode, Graph, GraphExec, GraphId, GraphNode, HostNodeParams, KernelArg,
    KernelNodeParams, LaunchConfig, Memcpy1DParams, MemcpyFromSymbolParams, MemcpyKind,
    MemcpyToSymbolParams, MemsetParams, NodeParams, Runtime, RuntimeError, RuntimeResult,
    Stream, SymbolHandle,
};
use once_cell::sync::{Lazy, OnceCell};
use tracing::debug;

static RUNTIME: Lazy<Runtime> = Lazy::new(Runtime::new);

/// Stream behind the null stream handle.
static DEFAULT_STREAM: OnceCell<Stream> = OnceCell::new();

static ERROR_STRINGS: Lazy<HashMap<i32, CString>> = Lazy::new(|| {
    ErrorCode::ALL
        .iter()
        .filter_map(|code| Some((code.as_raw(), CString::new(code.as_str()).ok()?)))
        .collect()
});

pub struct GrGraph(Graph);

pub struct GrGraphExec(GraphExec);

pub struct GrStream(Stream);

/// Packed node handle, `0` is the null node.
pub type GrNode = u64;

pub type GrHostFn = Option<unsafe extern "C" fn(user_data: *mut c_void)>;

#[repr(C)]
pub struct GrHostNodeParams {
    pub func: GrHostFn,
    pub user_data: *mut c_void,
}

#[repr(C)]
pub struct GrMemsetParams {
    pub dst: u64,
    pub value: u32,
    pub element_size: u32,
    pub width: usize,
    pub height: usize,
    pub pitch: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct GrDim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

pub const GR_ARG_PTR: u32 = 0;
pub const GR_ARG_I32: u32 = 1;
pub const GR_ARG_U32: u32 = 2;
pub const GR_ARG_U64: u32 = 3;
pub const GR_ARG_F32: u32 = 4;
pub const GR_ARG_USIZE: u32 = 5;

/// Kernel argument: `tag` selects how the low bits of `value` are read.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GrKernelArg {
    pub tag: u32,
    pub value: u64,
}

#[repr(C)]
pub struct GrKernelNodeParams {
    pub kernel_name: *const c_char,
    pub grid: GrDim3,
    pub block: GrDim3,
    pub shared_mem_bytes: u32,
    pub args: *const GrKernelArg,
    pub arg_count: usize,
}

fn status(result: RuntimeResult<()>) -> c_int {
    match result {
        Ok(()) => ErrorCode::Success.as_raw(),
        Err(err) => {
            debug!(error = %err, "c api call failed");
            err.code().as_raw()
        }
    }
}

fn encode(node: GraphNode) -> GrNode {
    (node.graph().as_raw() << 32) | (u64::from(node.slot()) + 1)
}

fn decode(node: GrNode) -> RuntimeResult<GraphNode> {
    let slot = (node & 0xffff_ffff) as u32;
    if slot == 0 {
        return Err(RuntimeError::invalid_value("null node handle"));
    }
    Ok(GraphNode::from_parts(GraphId::from_raw(node >> 32), slot - 1))
}

fn kind(raw: c_int) -> RuntimeResult<MemcpyKind> {
    MemcpyKind::from_raw(raw)
}

unsafe fn out_ref<'a, T>(out: *mut T) -> RuntimeResult<&'a mut T> {
    unsafe { out.as_mut() }.ok_or_else(|| RuntimeError::invalid_value("null output pointer"))
}

unsafe fn graph_ref<'a>(graph: *mut GrGraph) -> RuntimeResult<&'a mut Graph> {
    unsafe { graph.as_mut() }
        .map(|graph| &mut graph.0)
        .ok_or_else(|| RuntimeError::invalid_value("null graph handle"))
}

unsafe fn exec_ref<'a>(exec: *mut GrGraphExec) -> RuntimeResult<&'a mut GraphExec> {
    unsafe { exec.as_mut() }
        .map(|exec| &mut exec.0)
        .ok_or_else(|| RuntimeError::invalid_value("null graph exec handle"))
}

unsafe fn node_list(nodes: *const GrNode, count: usize) -> RuntimeResult<Vec<GraphNode>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if nodes.is_null() {
        return Err(RuntimeError::invalid_value("null node list"));
    }
    unsafe { std::slice::from_raw_parts(nodes, count) }
        .iter()
        .map(|node| decode(*node))
        .collect()
}

unsafe fn c_str<'a>(value: *const c_char) -> RuntimeResult<&'a str> {
    if value.is_null() {
        return Err(RuntimeError::invalid_value("null string"));
    }
    unsafe { CStr::from_ptr(value) }
        .to_str()
        .map_err(|_| RuntimeError::invalid_value("string is not UTF-8"))
}

/// Raw user data handed back to a C callback on a stream worker.
struct UserData(*mut c_void);

// The C caller owns the pointee and promises it may be used from the worker thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

unsafe fn host_params(params: *const GrHostNodeParams) -> RuntimeResult<HostNodeParams> {
    let params = unsafe { params.as_ref() }
        .ok_or_else(|| RuntimeError::invalid_value("null host node params"))?;
    let Some(func) = params.func else {
        return Ok(HostNodeParams::default());
    };
    let data = UserData(params.user_data);
    Ok(HostNodeParams::new(move || unsafe { func(data.get()) }))
}

unsafe fn memset_params(params: *const GrMemsetParams) -> RuntimeResult<MemsetParams> {
    let params = unsafe { params.as_ref() }
        .ok_or_else(|| RuntimeError::invalid_value("null memset params"))?;
    Ok(MemsetParams {
        dst: DevicePtr::from_addr(params.dst),
        value: params.value,
        element_size: params.element_size,
        width: params.width,
        height: params.height,
        pitch: params.pitch,
    })
}

fn kernel_arg(arg: &GrKernelArg) -> RuntimeResult<KernelArg> {
    Ok(match arg.tag {
        GR_ARG_PTR => KernelArg::Ptr(DevicePtr::from_addr(arg.value)),
        GR_ARG_I32 => KernelArg::I32(arg.value as u32 as i32),
        GR_ARG_U32 => KernelArg::U32(arg.value as u32),
        GR_ARG_U64 => KernelArg::U64(arg.value),
        GR_ARG_F32 => KernelArg::F32(f32::from_bits(arg.value as u32)),
        GR_ARG_USIZE => KernelArg::Usize(arg.value as usize),
        other => {
            return Err(RuntimeError::invalid_value(format!(
                "unknown kernel argument tag {other}"
            )))
        }
    })
}

unsafe fn kernel_params(params: *const GrKernelNodeParams) -> RuntimeResult<KernelNodeParams> {
    let params = unsafe { params.as_ref() }
        .ok_or_else(|| RuntimeError::invalid_value("null kernel node params"))?;
    let name = unsafe { c_str(params.kernel_name) }?;
    let args = if params.arg_count == 0 {
        Vec::new()
    } else if params.args.is_null() {
        return Err(RuntimeError::invalid_value("null kernel argument list"));
    } else {
        unsafe { std::slice::from_raw_parts(params.args, params.arg_count) }
            .iter()
            .map(kernel_arg)
            .collect::<RuntimeResult<Vec<_>>>()?
    };
    let dim = |d: GrDim3| Dim3::new(d.x, d.y, d.z);
    Ok(KernelNodeParams {
        kernel: kernel_by_name(name),
        config: LaunchConfig {
            grid: dim(params.grid),
            block: dim(params.block),
            shared_mem_bytes: params.shared_mem_bytes,
        },
        args,
    })
}

fn default_stream() -> RuntimeResult<&'static Stream> {
    DEFAULT_STREAM.get_or_try_init(|| RUNTIME.create_stream())
}

// Errors and device

/// Static description of `code`; unknown codes yield null.
#[no_mangle]
pub extern "C" fn gr_get_error_string(code: c_int) -> *const c_char {
    ERROR_STRINGS
        .get(&code)
        .map_or(std::ptr::null(), |message| message.as_ptr())
}

#[no_mangle]
pub extern "C" fn gr_device_synchronize() -> c_int {
    status(RUNTIME.device_synchronize())
}

#[no_mangle]
/// # Safety
/// `count` must be null or valid for a write.
pub unsafe extern "C" fn gr_get_device_count(count: *mut c_int) -> c_int {
    status((|| -> RuntimeResult<()> {
        *unsafe { out_ref(count) }? = RUNTIME.device_count() as c_int;
        Ok(())
    })())
}

#[no_mangle]
pub extern "C" fn gr_set_device(ordinal: c_int) -> c_int {
    status(
        u32::try_from(ordinal)
            .map_err(|_| RuntimeError::invalid_device(format!("device {ordinal}")))
            .and_then(|ordinal| RUNTIME.set_device(ordinal)),
    )
}

// Memory

#[no_mangle]
/// # Safety
/// `ptr` must be null or valid for a write.
pub unsafe extern "C" fn gr_malloc(ptr: *mut u64, bytes: usize) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(ptr) }?;
        *out = RUNTIME.malloc(bytes)?.addr();
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `ptr` must be null or valid for a write.
pub unsafe extern "C" fn gr_host_malloc(ptr: *mut u64, bytes: usize) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(ptr) }?;
        *out = RUNTIME.host_malloc(bytes)?.addr();
        Ok(())
    })())
}

#[no_mangle]
pub extern "C" fn gr_free(ptr: u64) -> c_int {
    status(RUNTIME.free(DevicePtr::from_addr(ptr)))
}

#[no_mangle]
pub extern "C" fn gr_memcpy(dst: u64, src: u64, bytes: usize, kind: c_int) -> c_int {
    status(kind_then(kind, |kind| {
        RUNTIME.memcpy(DevicePtr::from_addr(dst), DevicePtr::from_addr(src), bytes, kind)
    }))
}

#[no_mangle]
pub extern "C" fn gr_memset(dst: u64, value: c_int, bytes: usize) -> c_int {
    status(RUNTIME.memset_d8(DevicePtr::from_addr(dst), value as u8, bytes))
}

#[no_mangle]
/// # Safety
/// `dst` must be valid for `bytes` bytes of writes; `src` must be a runtime pointer.
pub unsafe extern "C" fn gr_read(dst: *mut c_void, src: u64, bytes: usize) -> c_int {
    status((|| -> RuntimeResult<()> {
        if dst.is_null() {
            return Err(RuntimeError::invalid_value("null destination"));
        }
        let data: Vec<u8> = RUNTIME.read(DevicePtr::from_addr(src), bytes)?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst.cast::<u8>(), data.len()) };
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `src` must be valid for `bytes` bytes of reads; `dst` must be a runtime pointer.
pub unsafe extern "C" fn gr_write(dst: u64, src: *const c_void, bytes: usize) -> c_int {
    status((|| -> RuntimeResult<()> {
        if src.is_null() {
            return Err(RuntimeError::invalid_value("null source"));
        }
        let data = unsafe { std::slice::from_raw_parts(src.cast::<u8>(), bytes) };
        RUNTIME.write(DevicePtr::from_addr(dst), data)
    })())
}

fn kind_then(raw: c_int, f: impl FnOnce(MemcpyKind) -> RuntimeResult<()>) -> RuntimeResult<()> {
    f(kind(raw)?)
}

// Symbols

#[no_mangle]
/// # Safety
/// `name` must be a NUL-terminated string, `data` valid for `bytes` bytes and `symbol` null or
/// valid for a write.
pub unsafe extern "C" fn gr_register_symbol(
    symbol: *mut u64,
    name: *const c_char,
    data: *const c_void,
    bytes: usize,
    constant: c_int,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(symbol) }?;
        let name = unsafe { c_str(name) }?;
        if data.is_null() {
            return Err(RuntimeError::invalid_value("null symbol initialiser"));
        }
        let init = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), bytes) };
        *out = RUNTIME.register_symbol(name, init, constant != 0)?.as_raw();
        Ok(())
    })())
}

#[no_mangle]
pub extern "C" fn gr_memcpy_to_symbol(
    symbol: u64,
    src: u64,
    count: usize,
    offset: usize,
    kind: c_int,
) -> c_int {
    status(kind_then(kind, |kind| {
        RUNTIME.memcpy_to_symbol(
            SymbolHandle::from_raw(symbol),
            DevicePtr::from_addr(src),
            count,
            offset,
            kind,
        )
    }))
}

#[no_mangle]
pub extern "C" fn gr_memcpy_from_symbol(
    dst: u64,
    symbol: u64,
    count: usize,
    offset: usize,
    kind: c_int,
) -> c_int {
    status(kind_then(kind, |kind| {
        RUNTIME.memcpy_from_symbol(
            DevicePtr::from_addr(dst),
            SymbolHandle::from_raw(symbol),
            count,
            offset,
            kind,
        )
    }))
}

// Streams

#[no_mangle]
/// # Safety
/// `stream` must be null or valid for a write.
pub unsafe extern "C" fn gr_stream_create(stream: *mut *mut GrStream) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(stream) }?;
        *out = Box::into_raw(Box::new(GrStream(RUNTIME.create_stream()?)));
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `stream` must come from [`gr_stream_create`] and not be used afterwards.
pub unsafe extern "C" fn gr_stream_destroy(stream: *mut GrStream) -> c_int {
    if stream.is_null() {
        return ErrorCode::InvalidResourceHandle.as_raw();
    }
    drop(unsafe { Box::from_raw(stream) });
    ErrorCode::Success.as_raw()
}

#[no_mangle]
/// # Safety
/// `stream` must be null (the default stream) or a live stream handle.
pub unsafe extern "C" fn gr_stream_synchronize(stream: *mut GrStream) -> c_int {
    match unsafe { stream.as_ref() } {
        Some(stream) => status(stream.0.synchronize()),
        None => status(RUNTIME.device_synchronize()),
    }
}

// Graphs

#[no_mangle]
/// # Safety
/// `graph` must be null or valid for a write.
pub unsafe extern "C" fn gr_graph_create(graph: *mut *mut GrGraph) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(graph) }?;
        *out = Box::into_raw(Box::new(GrGraph(RUNTIME.create_graph())));
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `graph` must come from [`gr_graph_create`] or [`gr_graph_clone`] and not be used afterwards.
pub unsafe extern "C" fn gr_graph_destroy(graph: *mut GrGraph) -> c_int {
    if graph.is_null() {
        return ErrorCode::InvalidValue.as_raw();
    }
    drop(unsafe { Box::from_raw(graph) });
    ErrorCode::Success.as_raw()
}

#[no_mangle]
/// # Safety
/// `clone` must be null or valid for a write; `original` null or a live graph.
pub unsafe extern "C" fn gr_graph_clone(clone: *mut *mut GrGraph, original: *mut GrGraph) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(clone) }?;
        let original = unsafe { graph_ref(original) }?;
        *out = Box::into_raw(Box::new(GrGraph(original.clone_graph())));
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `node` must be null or valid for a write; `clone` null or a live graph.
pub unsafe extern "C" fn gr_graph_node_find_in_clone(
    node: *mut GrNode,
    original: GrNode,
    clone: *mut GrGraph,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(node) }?;
        let clone = unsafe { graph_ref(clone) }?;
        let found = clone
            .find_in_clone(decode(original)?)
            .ok_or_else(|| RuntimeError::invalid_value("node has no counterpart in the clone"))?;
        *out = encode(found);
        Ok(())
    })())
}

unsafe fn add_node(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    params: impl FnOnce() -> RuntimeResult<NodeParams>,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(node) }?;
        let graph = unsafe { graph_ref(graph) }?;
        let deps = unsafe { node_list(deps, dep_count) }?;
        *out = encode(graph.add_node(&deps, params()?)?);
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_empty_node(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
) -> c_int {
    unsafe { add_node(node, graph, deps, dep_count, || Ok(NodeParams::Empty)) }
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_host_node(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    params: *const GrHostNodeParams,
) -> c_int {
    unsafe {
        add_node(node, graph, deps, dep_count, || {
            host_params(params).map(NodeParams::Host)
        })
    }
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_memcpy_node_1d(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    dst: u64,
    src: u64,
    bytes: usize,
    kind_raw: c_int,
) -> c_int {
    unsafe {
        add_node(node, graph, deps, dep_count, || {
            Ok(NodeParams::Memcpy1D(Memcpy1DParams::new(
                DevicePtr::from_addr(dst),
                DevicePtr::from_addr(src),
                bytes,
                kind(kind_raw)?,
            )))
        })
    }
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_memcpy_node_to_symbol(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    symbol: u64,
    src: u64,
    count: usize,
    offset: usize,
    kind_raw: c_int,
) -> c_int {
    unsafe {
        add_node(node, graph, deps, dep_count, || {
            Ok(NodeParams::MemcpyToSymbol(to_symbol(symbol, src, count, offset, kind_raw)?))
        })
    }
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_memcpy_node_from_symbol(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    dst: u64,
    symbol: u64,
    count: usize,
    offset: usize,
    kind_raw: c_int,
) -> c_int {
    unsafe {
        add_node(node, graph, deps, dep_count, || {
            Ok(NodeParams::MemcpyFromSymbol(from_symbol(dst, symbol, count, offset, kind_raw)?))
        })
    }
}

fn to_symbol(
    symbol: u64,
    src: u64,
    count: usize,
    offset: usize,
    kind_raw: c_int,
) -> RuntimeResult<MemcpyToSymbolParams> {
    Ok(MemcpyToSymbolParams::new(
        SymbolHandle::from_raw(symbol),
        DevicePtr::from_addr(src),
        count,
        offset,
        kind(kind_raw)?,
    ))
}

fn from_symbol(
    dst: u64,
    symbol: u64,
    count: usize,
    offset: usize,
    kind_raw: c_int,
) -> RuntimeResult<MemcpyFromSymbolParams> {
    Ok(MemcpyFromSymbolParams::new(
        DevicePtr::from_addr(dst),
        SymbolHandle::from_raw(symbol),
        count,
        offset,
        kind(kind_raw)?,
    ))
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_memset_node(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    params: *const GrMemsetParams,
) -> c_int {
    unsafe {
        add_node(node, graph, deps, dep_count, || {
            memset_params(params).map(NodeParams::Memset)
        })
    }
}

#[no_mangle]
/// # Safety
/// Pointer arguments must be null or valid; `deps` must hold `dep_count` handles.
pub unsafe extern "C" fn gr_graph_add_kernel_node(
    node: *mut GrNode,
    graph: *mut GrGraph,
    deps: *const GrNode,
    dep_count: usize,
    params: *const GrKernelNodeParams,
) -> c_int {
    unsafe {
        add_node(node, graph, deps, dep_count, || {
            kernel_params(params).map(NodeParams::Kernel)
        })
    }
}

#[no_mangle]
/// # Safety
/// `from` and `to` must each hold `count` handles.
pub unsafe extern "C" fn gr_graph_add_dependencies(
    graph: *mut GrGraph,
    from: *const GrNode,
    to: *const GrNode,
    count: usize,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let graph = unsafe { graph_ref(graph) }?;
        let from = unsafe { node_list(from, count) }?;
        let to = unsafe { node_list(to, count) }?;
        graph.add_dependencies(&from, &to)
    })())
}

#[no_mangle]
/// # Safety
/// `graph` must be null or a live graph.
pub unsafe extern "C" fn gr_graph_destroy_node(graph: *mut GrGraph, node: GrNode) -> c_int {
    status((|| -> RuntimeResult<()> {
        let graph = unsafe { graph_ref(graph) }?;
        graph.destroy_node(decode(node)?)
    })())
}

#[no_mangle]
/// Two-call root query: with `nodes` null, writes the root count to `count`; otherwise fills
/// up to `*count` entries, zeroes the rest and writes back how many were filled.
///
/// # Safety
/// `count` must be null or valid; `nodes` must be null or hold `*count` entries.
pub unsafe extern "C" fn gr_graph_get_root_nodes(
    graph: *mut GrGraph,
    nodes: *mut GrNode,
    count: *mut usize,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let graph = unsafe { graph_ref(graph) }?;
        let count = unsafe { out_ref(count) }?;
        if nodes.is_null() {
            return graph.get_root_nodes(None, count);
        }
        let roots = graph.root_nodes();
        let slots = unsafe { std::slice::from_raw_parts_mut(nodes, *count) };
        for (at, slot) in slots.iter_mut().enumerate() {
            *slot = roots.get(at).map_or(0, |node| encode(*node));
        }
        if *count > roots.len() {
            *count = roots.len();
        }
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `kind` must be null or valid for a write; `graph` null or a live graph.
pub unsafe extern "C" fn gr_graph_node_get_type(
    graph: *mut GrGraph,
    node: GrNode,
    kind: *mut c_int,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(kind) }?;
        let graph = unsafe { graph_ref(graph) }?;
        *out = graph.node_kind(decode(node)?)?.as_raw() as c_int;
        Ok(())
    })())
}

// Instances

#[no_mangle]
/// # Safety
/// `exec` must be null or valid for a write; `graph` null or a live graph.
pub unsafe extern "C" fn gr_graph_instantiate(
    exec: *mut *mut GrGraphExec,
    graph: *mut GrGraph,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let out = unsafe { out_ref(exec) }?;
        let graph = unsafe { graph_ref(graph) }?;
        let instance = graph.instantiate()?;
        debug!(nodes = instance.node_count(), "instantiated graph through the c api");
        *out = Box::into_raw(Box::new(GrGraphExec(instance)));
        Ok(())
    })())
}

#[no_mangle]
/// # Safety
/// `exec` must come from [`gr_graph_instantiate`] and not be used afterwards.
pub unsafe extern "C" fn gr_graph_exec_destroy(exec: *mut GrGraphExec) -> c_int {
    if exec.is_null() {
        return ErrorCode::InvalidValue.as_raw();
    }
    drop(unsafe { Box::from_raw(exec) });
    ErrorCode::Success.as_raw()
}

#[no_mangle]
/// Launches `exec` on `stream`. The null stream runs the instance to completion before
/// returning.
///
/// # Safety
/// `exec` must be null or a live instance; `stream` null or a live stream.
pub unsafe extern "C" fn gr_graph_launch(exec: *mut GrGraphExec, stream: *mut GrStream) -> c_int {
    status((|| -> RuntimeResult<()> {
        let exec = unsafe { exec_ref(exec) }?;
        match unsafe { stream.as_ref() } {
            Some(stream) => exec.launch(&stream.0),
            None => {
                let stream = default_stream()?;
                exec.launch(stream)?;
                stream.synchronize()
            }
        }
    })())
}

unsafe fn set_exec_params(
    exec: *mut GrGraphExec,
    node: GrNode,
    params: impl FnOnce() -> RuntimeResult<NodeParams>,
) -> c_int {
    status((|| -> RuntimeResult<()> {
        let exec = unsafe { exec_ref(exec) }?;
        exec.set_node_params(decode(node)?, params()?)
    })())
}

#[no_mangle]
/// # Safety
/// `exec` must be null or a live instance; `params` null or valid.
pub unsafe extern "C" fn gr_graph_exec_host_node_set_params(
    exec: *mut GrGraphExec,
    node: GrNode,
    params: *const GrHostNodeParams,
) -> c_int {
    unsafe { set_exec_params(exec, node, || host_params(params).map(NodeParams::Host)) }
}

#[no_mangle]
/// # Safety
/// `exec` must be null or a live instance.
pub unsafe extern "C" fn gr_graph_exec_memcpy_node_set_params_1d(
    exec: *mut GrGraphExec,
    node: GrNode,
    dst: u64,
    src: u64,
    bytes: usize,
    kind_raw: c_int,
) -> c_int {
    unsafe {
        set_exec_params(exec, node, || {
            Ok(NodeParams::Memcpy1D(Memcpy1DParams::new(
                DevicePtr::from_addr(dst),
                DevicePtr::from_addr(src),
                bytes,
                kind(kind_raw)?,
            )))
        })
    }
}

#[no_mangle]
/// # Safety
/// `exec` must be null or a live instance.
pub unsafe extern "C" fn gr_graph_exec_memcpy_node_set_params_to_symbol(
    exec: *mut GrGraphExec,
    node: GrNode,
    symbol: u64,
    src: u64,
    count: usize,
    offset: usize,
    kind_raw: c_int,
) -> c_int {
    unsafe {
        set_exec_params(exec, node, || {
            Ok(NodeParams::MemcpyToSymbol(to_symbol(symbol, src, count, offset, kind_raw)?))
        })
    }
}

#[no_mangle]
/// # Safety
/// `exec` must be null or a live instance.
pub unsafe extern "C" fn gr_graph_exec_memcpy_node_set_params_from_symbol(
    exec: *mut GrGraphExec,
    node: GrNode,
    dst: u64,
    symbol: u64,
    count: usize,
    offset: usize,
    kind_raw: c_int,
) -> c_int {
    unsafe {
        set_exec_params(exec, node, || {
            Ok(NodeParams::MemcpyFromSymbol(from_symbol(dst, symbol, count, offset, kind_raw)?))
        })
    }
}

#[no_mangle]
/// # Safety
/// `exec` must be null or a live instance; `params` null or valid.
pub unsafe extern "C" fn gr_graph_exec_memset_node_set_params(
    exec: *mut GrGraphExec,
    node: GrNode,
    params: *const GrMemsetParams,
) -> c_int {
    unsafe { set_exec_params(exec, node, || memset_params(params).map(NodeParams::Memset)) }
}
