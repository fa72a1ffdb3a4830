use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use graphrt::{ErrorCode, MemcpyKind, NodeKind};
use graphrt_c_api::*;

const OK: c_int = ErrorCode::Success as c_int;

fn code(code: ErrorCode) -> c_int {
    code.as_raw()
}

fn raw(kind: MemcpyKind) -> c_int {
    kind.as_raw()
}

unsafe fn new_graph() -> *mut GrGraph {
    let mut graph = ptr::null_mut();
    assert_eq!(unsafe { gr_graph_create(&mut graph) }, OK);
    graph
}

#[test]
fn error_strings_are_static() {
    let message = gr_get_error_string(code(ErrorCode::InvalidSymbol));
    assert!(!message.is_null());
    let message = unsafe { CStr::from_ptr(message) }.to_str().expect("utf-8");
    assert_eq!(message, "invalid device symbol");
    assert!(gr_get_error_string(-12345).is_null());
}

#[test]
fn root_nodes_two_call_and_null_arguments() {
    unsafe {
        let graph = new_graph();
        let mut a = 0;
        let mut b = 0;
        let mut c = 0;
        assert_eq!(gr_graph_add_empty_node(&mut a, graph, ptr::null(), 0), OK);
        assert_eq!(gr_graph_add_empty_node(&mut b, graph, ptr::null(), 0), OK);
        assert_eq!(gr_graph_add_empty_node(&mut c, graph, [a, b].as_ptr(), 2), OK);

        let mut count = 0usize;
        assert_eq!(gr_graph_get_root_nodes(graph, ptr::null_mut(), &mut count), OK);
        assert_eq!(count, 2);
        let mut nodes = [u64::MAX; 3];
        count = 3;
        assert_eq!(gr_graph_get_root_nodes(graph, nodes.as_mut_ptr(), &mut count), OK);
        assert_eq!(count, 2);
        assert_eq!(nodes, [a, b, 0]);

        assert_eq!(
            gr_graph_get_root_nodes(ptr::null_mut(), ptr::null_mut(), &mut count),
            code(ErrorCode::InvalidValue)
        );
        assert_eq!(
            gr_graph_get_root_nodes(graph, nodes.as_mut_ptr(), ptr::null_mut()),
            code(ErrorCode::InvalidValue)
        );
        assert_eq!(
            gr_graph_add_empty_node(&mut a, graph, [0u64].as_ptr(), 1),
            code(ErrorCode::InvalidValue)
        );
        assert_eq!(gr_graph_destroy(graph), OK);
        assert_eq!(gr_graph_destroy(ptr::null_mut()), code(ErrorCode::InvalidValue));
    }
}

#[test]
fn root_nodes_fill_only_the_callers_array() {
    unsafe {
        let graph = new_graph();
        let mut a = 0;
        let mut b = 0;
        assert_eq!(gr_graph_add_empty_node(&mut a, graph, ptr::null(), 0), OK);
        assert_eq!(gr_graph_add_empty_node(&mut b, graph, ptr::null(), 0), OK);

        let mut short = [u64::MAX; 1];
        let mut count = short.len();
        assert_eq!(gr_graph_get_root_nodes(graph, short.as_mut_ptr(), &mut count), OK);
        assert_eq!(count, 1);
        assert_eq!(short, [a]);

        let mut wide = vec![u64::MAX; 1 << 16];
        count = wide.len();
        assert_eq!(gr_graph_get_root_nodes(graph, wide.as_mut_ptr(), &mut count), OK);
        assert_eq!(count, 2);
        assert_eq!(&wide[..2], &[a, b]);
        assert!(wide[2..].iter().all(|&node| node == 0));
        assert_eq!(gr_graph_destroy(graph), OK);
    }
}

#[test]
fn symbol_nodes_report_their_type() {
    unsafe {
        let name = CString::new("c_api_symbol_nodes").expect("name");
        let init = [1i32, 2, 3, 4, 5];
        let mut symbol = 0u64;
        assert_eq!(
            gr_register_symbol(&mut symbol, name.as_ptr(), init.as_ptr().cast(), 20, 0),
            OK
        );
        let mut dev = 0u64;
        assert_eq!(gr_malloc(&mut dev, 20), OK);

        let graph = new_graph();
        let mut from = 0;
        let mut to = 0;
        assert_eq!(
            gr_graph_add_memcpy_node_from_symbol(
                &mut from,
                graph,
                ptr::null(),
                0,
                dev,
                symbol,
                20,
                0,
                raw(MemcpyKind::DeviceToDevice),
            ),
            OK
        );
        assert_eq!(
            gr_graph_add_memcpy_node_to_symbol(
                &mut to,
                graph,
                [from].as_ptr(),
                1,
                symbol,
                dev,
                20,
                0,
                raw(MemcpyKind::Default),
            ),
            OK
        );
        let mut kind = -1;
        assert_eq!(gr_graph_node_get_type(graph, from, &mut kind), OK);
        assert_eq!(kind, NodeKind::MemcpyFromSymbol.as_raw() as c_int);
        assert_eq!(kind, 6);
        assert_eq!(gr_graph_node_get_type(graph, to, &mut kind), OK);
        assert_eq!(kind, 7);

        assert_eq!(
            gr_graph_add_memcpy_node_from_symbol(
                &mut from,
                graph,
                ptr::null(),
                0,
                dev,
                symbol,
                0,
                0,
                raw(MemcpyKind::DeviceToDevice),
            ),
            code(ErrorCode::InvalidValue)
        );
        assert_eq!(
            gr_graph_add_memcpy_node_from_symbol(
                &mut from,
                graph,
                ptr::null(),
                0,
                dev,
                0,
                4,
                0,
                raw(MemcpyKind::DeviceToDevice),
            ),
            code(ErrorCode::InvalidSymbol)
        );
        assert_eq!(
            gr_graph_add_memcpy_node_from_symbol(
                &mut from, graph, ptr::null(), 0, dev, symbol, 4, 0, -1,
            ),
            code(ErrorCode::InvalidMemcpyDirection)
        );
        gr_graph_destroy(graph);
        gr_free(dev);
    }
}

static HITS_A: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn bump(user_data: *mut c_void) {
    let counter = unsafe { &*user_data.cast::<AtomicUsize>() };
    counter.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn host_node_params_swap_callbacks() {
    static HITS_B: AtomicUsize = AtomicUsize::new(0);
    unsafe {
        let graph = new_graph();
        let first = GrHostNodeParams {
            func: Some(bump),
            user_data: &HITS_A as *const AtomicUsize as *mut c_void,
        };
        let mut node = 0;
        assert_eq!(gr_graph_add_host_node(&mut node, graph, ptr::null(), 0, &first), OK);
        let mut exec = ptr::null_mut();
        assert_eq!(gr_graph_instantiate(&mut exec, graph), OK);

        let second = GrHostNodeParams {
            func: Some(bump),
            user_data: &HITS_B as *const AtomicUsize as *mut c_void,
        };
        assert_eq!(gr_graph_exec_host_node_set_params(exec, node, &second), OK);
        let empty = GrHostNodeParams {
            func: None,
            user_data: ptr::null_mut(),
        };
        assert_eq!(
            gr_graph_exec_host_node_set_params(exec, node, &empty),
            code(ErrorCode::InvalidValue)
        );

        let mut stream = ptr::null_mut();
        assert_eq!(gr_stream_create(&mut stream), OK);
        assert_eq!(gr_graph_launch(exec, stream), OK);
        assert_eq!(gr_stream_synchronize(stream), OK);
        // The null stream completes before returning.
        assert_eq!(gr_graph_launch(exec, ptr::null_mut()), OK);
        assert_eq!(HITS_B.load(Ordering::SeqCst), 2);
        assert_eq!(HITS_A.load(Ordering::SeqCst), 0);

        assert_eq!(gr_stream_destroy(stream), OK);
        assert_eq!(gr_graph_exec_destroy(exec), OK);
        assert_eq!(gr_graph_destroy(graph), OK);
    }
}

#[test]
fn exec_from_symbol_update_through_c() {
    unsafe {
        let name = CString::new("c_api_exec_from_symbol").expect("name");
        let alt_name = CString::new("c_api_exec_from_symbol_alt").expect("name");
        let values = [11u32, 22, 33];
        let zeros = [0u32; 3];
        let mut symbol = 0;
        let mut alt = 0;
        assert_eq!(gr_register_symbol(&mut symbol, name.as_ptr(), values.as_ptr().cast(), 12, 1), OK);
        assert_eq!(gr_register_symbol(&mut alt, alt_name.as_ptr(), zeros.as_ptr().cast(), 12, 0), OK);
        let mut pinned = 0;
        assert_eq!(gr_host_malloc(&mut pinned, 12), OK);

        let graph = new_graph();
        let mut node = 0;
        let d2h = raw(MemcpyKind::DeviceToHost);
        assert_eq!(
            gr_graph_add_memcpy_node_from_symbol(&mut node, graph, ptr::null(), 0, pinned, alt, 12, 0, d2h),
            OK
        );
        let mut exec = ptr::null_mut();
        assert_eq!(gr_graph_instantiate(&mut exec, graph), OK);
        assert_eq!(
            gr_graph_exec_memcpy_node_set_params_from_symbol(exec, node, pinned, symbol, 12, 0, d2h),
            OK
        );
        assert_eq!(
            gr_graph_exec_memcpy_node_set_params_from_symbol(
                exec,
                node,
                pinned,
                symbol,
                12,
                0,
                raw(MemcpyKind::HostToDevice),
            ),
            code(ErrorCode::InvalidMemcpyDirection)
        );
        assert_eq!(gr_graph_launch(exec, ptr::null_mut()), OK);

        let mut out = [0u32; 3];
        assert_eq!(gr_read(out.as_mut_ptr().cast(), pinned, 12), OK);
        assert_eq!(out, values);

        gr_graph_exec_destroy(exec);
        gr_graph_destroy(graph);
        assert_eq!(gr_free(pinned), OK);
    }
}

#[test]
fn kernel_nodes_resolve_by_name() {
    unsafe {
        let n = 64u64;
        let mut a = 0;
        let mut c = 0;
        assert_eq!(gr_malloc(&mut a, 256), OK);
        assert_eq!(gr_malloc(&mut c, 256), OK);
        let input: Vec<f32> = (0..n).map(|i| i as f32).collect();
        assert_eq!(gr_write(a, input.as_ptr().cast(), 256), OK);

        let name = CString::new("vector_square_f32").expect("name");
        let args = [
            GrKernelArg { tag: GR_ARG_PTR, value: a },
            GrKernelArg { tag: GR_ARG_PTR, value: c },
            GrKernelArg { tag: GR_ARG_USIZE, value: n },
        ];
        let params = GrKernelNodeParams {
            kernel_name: name.as_ptr(),
            grid: GrDim3 { x: 1, y: 1, z: 1 },
            block: GrDim3 { x: 64, y: 1, z: 1 },
            shared_mem_bytes: 0,
            args: args.as_ptr(),
            arg_count: args.len(),
        };
        let graph = new_graph();
        let mut node = 0;
        assert_eq!(gr_graph_add_kernel_node(&mut node, graph, ptr::null(), 0, &params), OK);

        let missing = CString::new("no_such_kernel").expect("name");
        let unknown = GrKernelNodeParams {
            kernel_name: missing.as_ptr(),
            ..params
        };
        assert_eq!(
            gr_graph_add_kernel_node(&mut node, graph, ptr::null(), 0, &unknown),
            code(ErrorCode::InvalidValue)
        );

        let mut exec = ptr::null_mut();
        assert_eq!(gr_graph_instantiate(&mut exec, graph), OK);
        assert_eq!(gr_graph_launch(exec, ptr::null_mut()), OK);
        let mut out = vec![0f32; n as usize];
        assert_eq!(gr_read(out.as_mut_ptr().cast(), c, 256), OK);
        assert!(out.iter().enumerate().all(|(i, v)| *v == (i * i) as f32));

        gr_graph_exec_destroy(exec);
        gr_graph_destroy(graph);
    }
}

#[test]
fn clone_maps_nodes_across_graphs() {
    unsafe {
        let graph = new_graph();
        let mut a = 0;
        let mut b = 0;
        assert_eq!(gr_graph_add_empty_node(&mut a, graph, ptr::null(), 0), OK);
        assert_eq!(gr_graph_add_empty_node(&mut b, graph, ptr::null(), 0), OK);
        assert_eq!(gr_graph_add_dependencies(graph, [a].as_ptr(), [b].as_ptr(), 1), OK);
        assert_eq!(
            gr_graph_add_dependencies(graph, [b].as_ptr(), [a].as_ptr(), 1),
            code(ErrorCode::InvalidValue)
        );

        let mut clone = ptr::null_mut();
        assert_eq!(gr_graph_clone(&mut clone, graph), OK);
        let mut twin = 0;
        assert_eq!(gr_graph_node_find_in_clone(&mut twin, b, clone), OK);
        assert_ne!(twin, b);
        let mut count = 0;
        assert_eq!(gr_graph_get_root_nodes(clone, ptr::null_mut(), &mut count), OK);
        assert_eq!(count, 1);

        assert_eq!(gr_graph_destroy_node(graph, a), OK);
        assert_eq!(gr_graph_get_root_nodes(graph, ptr::null_mut(), &mut count), OK);
        assert_eq!(count, 1);

        gr_graph_destroy(clone);
        gr_graph_destroy(graph);
    }
}
