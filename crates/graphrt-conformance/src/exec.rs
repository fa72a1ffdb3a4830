use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use graphrt::{
    DevicePtr, ErrorCode, Graph, GraphNode, HostNodeParams, Memcpy1DParams, MemcpyKind,
    MemsetParams, NodeParams, Runtime,
};

use crate::expect_code;

const N: usize = 1024;

/// Host callback writing `f(i)` into every element of `target`.
fn fill_with(runtime: &Runtime, target: DevicePtr, f: fn(i32) -> i32) -> HostNodeParams {
    let runtime = runtime.clone();
    HostNodeParams::new(move || {
        let values: Vec<i32> = (0..N as i32).map(f).collect();
        // Host writes into pageable memory cannot fail for an in-range buffer.
        let _ = runtime.write(target, &values);
    })
}

struct HostGraph {
    graph: Graph,
    host_node: GraphNode,
    empty_node: GraphNode,
    a_host: DevicePtr,
    c_host: DevicePtr,
}

/// H2D(A), H2D(C) -> D2H(C into A) -> host(F1 writes A) -> empty.
fn host_graph(runtime: &Runtime) -> HostGraph {
    let bytes = N * std::mem::size_of::<i32>();
    let a_host = runtime.alloc_pageable(bytes).expect("a_host");
    let c_host = runtime.alloc_pageable(bytes).expect("c_host");
    let a_dev = runtime.malloc(bytes).expect("a_dev");
    let c_dev = runtime.malloc(bytes).expect("c_dev");

    let mut graph = runtime.create_graph();
    let h2d_a = graph
        .add_memcpy_node_1d(&[], Memcpy1DParams::new(a_dev, a_host, bytes, MemcpyKind::HostToDevice))
        .expect("h2d a");
    let h2d_c = graph
        .add_memcpy_node_1d(&[], Memcpy1DParams::new(c_dev, c_host, bytes, MemcpyKind::HostToDevice))
        .expect("h2d c");
    let d2h = graph
        .add_memcpy_node_1d(&[], Memcpy1DParams::new(a_host, c_dev, bytes, MemcpyKind::DeviceToHost))
        .expect("d2h");
    let host_node = graph
        .add_host_node(&[], fill_with(runtime, a_host, |i| i))
        .expect("host node");
    graph.add_dependencies(&[h2d_a, h2d_c, d2h], &[d2h, d2h, host_node]).expect("edges");
    let empty_node = graph.add_empty_node(&[host_node]).expect("empty");
    HostGraph {
        graph,
        host_node,
        empty_node,
        a_host,
        c_host,
    }
}

pub fn host_params_replace_callback(runtime: &Runtime) {
    let setup = host_graph(runtime);
    let mut exec = setup.graph.instantiate().expect("instantiate");
    exec.set_host_node_params(setup.host_node, fill_with(runtime, setup.c_host, |i| i * i))
        .expect("set host params");

    let stream = runtime.create_stream().expect("stream");
    exec.launch(&stream).expect("launch");
    stream.synchronize().expect("synchronize");

    let squares: Vec<i32> = runtime.read(setup.c_host, N).expect("read c");
    assert!(squares.iter().enumerate().all(|(i, v)| *v == (i * i) as i32));
    // F1 never ran: A holds the D2H copy of C's original contents, not 0..N.
    let a: Vec<i32> = runtime.read(setup.a_host, N).expect("read a");
    assert!(a.iter().all(|v| *v == 0));
}

pub fn host_params_negative(runtime: &Runtime) {
    let mut setup = host_graph(runtime);
    let mut exec = setup.graph.instantiate().expect("instantiate");

    expect_code(
        exec.set_host_node_params(setup.host_node, HostNodeParams::default()),
        ErrorCode::InvalidValue,
    );
    expect_code(
        exec.set_host_node_params(setup.empty_node, fill_with(runtime, setup.c_host, |i| i)),
        ErrorCode::InvalidValue,
    );
    let late = setup
        .graph
        .add_host_node(&[], fill_with(runtime, setup.a_host, |i| i))
        .expect("late node");
    expect_code(
        exec.set_host_node_params(late, fill_with(runtime, setup.c_host, |i| i)),
        ErrorCode::InvalidValue,
    );
    let mut other = runtime.create_graph();
    let foreign = other
        .add_host_node(&[], fill_with(runtime, setup.a_host, |i| i))
        .expect("foreign");
    expect_code(
        exec.set_host_node_params(foreign, fill_with(runtime, setup.c_host, |i| i)),
        ErrorCode::InvalidValue,
    );
    assert_eq!(exec.node_count(), 5);
}

pub fn instance_outlives_graph(runtime: &Runtime) {
    let hits = Arc::new(AtomicUsize::new(0));
    let exec = {
        let mut graph = runtime.create_graph();
        let counter = Arc::clone(&hits);
        let first = graph
            .add_host_node(&[], HostNodeParams::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("host");
        let exec = graph.instantiate().expect("instantiate");
        // Edits after instantiation are invisible to the instance.
        graph.add_empty_node(&[first]).expect("late node");
        exec
    };
    assert_eq!(exec.node_count(), 1);
    let stream = runtime.create_stream().expect("stream");
    exec.launch(&stream).expect("first launch");
    exec.launch(&stream).expect("second launch");
    stream.synchronize().expect("synchronize");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

pub fn updates_leave_siblings_alone(runtime: &Runtime) {
    let dev = runtime.malloc(64).expect("dev");
    let other = runtime.malloc(64).expect("other");
    let mut graph = runtime.create_graph();
    let fill = graph
        .add_memset_node(&[], MemsetParams::d8(dev, 1, 64))
        .expect("memset");
    let sibling = graph
        .add_memset_node(&[fill], MemsetParams::d8(other, 2, 64))
        .expect("sibling");
    let mut exec = graph.instantiate().expect("instantiate");
    let before = exec.execution_order();

    exec.set_memset_node_params(fill, MemsetParams::d32(dev, 0x0a0b_0c0d, 16))
        .expect("update memset");
    expect_code(
        exec.set_memset_node_params(fill, MemsetParams::d8(DevicePtr::NULL, 1, 64)),
        ErrorCode::InvalidValue,
    );

    assert_eq!(exec.execution_order(), before);
    match exec.node_params(sibling).expect("sibling params") {
        NodeParams::Memset(params) => assert_eq!(*params, MemsetParams::d8(other, 2, 64)),
        other => panic!("unexpected params {other:?}"),
    }
    let stream = runtime.create_stream().expect("stream");
    exec.launch(&stream).expect("launch");
    stream.synchronize().expect("synchronize");
    let words: Vec<u32> = runtime.read(dev, 16).expect("read");
    assert!(words.iter().all(|w| *w == 0x0a0b_0c0d));
    assert_eq!(runtime.read::<u8>(other, 64).expect("read"), vec![2u8; 64]);
}
