use std::sync::Arc;

use graphrt::kernels::{kernel_by_name, VECTOR_ADD_I32};
use graphrt::{
    DevicePtr, ErrorCode, Graph, GraphNode, KernelArg, KernelNodeParams, LaunchConfig,
    Memcpy1DParams, MemcpyKind, NodeKind, NodeParams, Runtime,
};

use crate::expect_code;

const N: usize = 1024;

/// Device and host buffers of the vector-add graph.
pub struct VectorAddBuffers {
    pub a_host: DevicePtr,
    pub b_host: DevicePtr,
    pub c_host: DevicePtr,
    pub a_dev: DevicePtr,
    pub b_dev: DevicePtr,
    pub c_dev: DevicePtr,
    pub len: usize,
}

impl VectorAddBuffers {
    pub fn new(runtime: &Runtime, len: usize) -> Self {
        let bytes = len * std::mem::size_of::<i32>();
        let buffers = Self {
            a_host: runtime.alloc_pageable(bytes).expect("a_host"),
            b_host: runtime.alloc_pageable(bytes).expect("b_host"),
            c_host: runtime.alloc_pageable(bytes).expect("c_host"),
            a_dev: runtime.malloc(bytes).expect("a_dev"),
            b_dev: runtime.malloc(bytes).expect("b_dev"),
            c_dev: runtime.malloc(bytes).expect("c_dev"),
            len,
        };
        let a: Vec<i32> = (0..len as i32).collect();
        let b: Vec<i32> = (0..len as i32).map(|x| x * 3 + 1).collect();
        runtime.write(buffers.a_host, &a).expect("init a");
        runtime.write(buffers.b_host, &b).expect("init b");
        buffers
    }

    pub fn bytes(&self) -> usize {
        self.len * std::mem::size_of::<i32>()
    }
}

/// Two H2D copies feeding a vector-add kernel followed by a D2H copy.
/// Returns the graph and the two root copy nodes.
pub fn vector_add_graph(runtime: &Runtime, buffers: &VectorAddBuffers) -> (Graph, [GraphNode; 2]) {
    let bytes = buffers.bytes();
    let mut graph = runtime.create_graph();
    let copy_a = graph
        .add_memcpy_node_1d(
            &[],
            Memcpy1DParams::new(buffers.a_dev, buffers.a_host, bytes, MemcpyKind::HostToDevice),
        )
        .expect("copy a");
    let copy_b = graph
        .add_memcpy_node_1d(
            &[],
            Memcpy1DParams::new(buffers.b_dev, buffers.b_host, bytes, MemcpyKind::HostToDevice),
        )
        .expect("copy b");
    let kernel = kernel_by_name(VECTOR_ADD_I32).expect("vector_add_i32 is built in");
    let add = graph
        .add_kernel_node(
            &[copy_a, copy_b],
            KernelNodeParams::new(
                kernel,
                LaunchConfig::for_elements(buffers.len, 256),
                vec![
                    KernelArg::Ptr(buffers.a_dev),
                    KernelArg::Ptr(buffers.b_dev),
                    KernelArg::Ptr(buffers.c_dev),
                    KernelArg::Usize(buffers.len),
                ],
            ),
        )
        .expect("kernel");
    graph
        .add_memcpy_node_1d(
            &[add],
            Memcpy1DParams::new(buffers.c_host, buffers.c_dev, bytes, MemcpyKind::DeviceToHost),
        )
        .expect("copy c");
    (graph, [copy_a, copy_b])
}

pub fn root_nodes_two_call(runtime: &Runtime) {
    let buffers = VectorAddBuffers::new(runtime, N);
    let (graph, roots) = vector_add_graph(runtime, &buffers);

    let mut count = 0;
    graph.get_root_nodes(None, &mut count).expect("count roots");
    assert_eq!(count, 2);

    let mut out = vec![None; count];
    graph
        .get_root_nodes(Some(out.as_mut_slice()), &mut count)
        .expect("fetch roots");
    assert_eq!(count, 2);
    assert_eq!(out, vec![Some(roots[0]), Some(roots[1])]);
    for node in out.into_iter().flatten() {
        assert_eq!(graph.node_kind(node).expect("kind"), NodeKind::Memcpy);
        assert!(graph.node_dependencies(node).expect("deps").is_empty());
    }
}

pub fn root_nodes_short_buffer(runtime: &Runtime) {
    let buffers = VectorAddBuffers::new(runtime, N);
    let (graph, roots) = vector_add_graph(runtime, &buffers);

    let mut count = 1;
    let mut out = vec![None; 1];
    graph
        .get_root_nodes(Some(out.as_mut_slice()), &mut count)
        .expect("fetch roots");
    assert_eq!(count, 1);
    let found = out[0].expect("one root written");
    assert!(roots.contains(&found));
}

pub fn root_nodes_long_buffer(runtime: &Runtime) {
    let buffers = VectorAddBuffers::new(runtime, N);
    let (graph, roots) = vector_add_graph(runtime, &buffers);
    let sentinel = graph.nodes()[2];

    let mut count = 3;
    let mut out = vec![Some(sentinel); 3];
    graph
        .get_root_nodes(Some(out.as_mut_slice()), &mut count)
        .expect("fetch roots");
    assert_eq!(count, 2);
    assert_eq!(out, vec![Some(roots[0]), Some(roots[1]), None]);
}

pub fn root_nodes_empty_graph(runtime: &Runtime) {
    let graph = runtime.create_graph();
    let mut count = 17;
    graph.get_root_nodes(None, &mut count).expect("count roots");
    assert_eq!(count, 0);
    assert!(graph.root_nodes().is_empty());
}

pub fn add_node_rejects_bad_dependencies(runtime: &Runtime) {
    let mut graph = runtime.create_graph();
    let mut other = runtime.create_graph();
    let foreign = other.add_empty_node(&[]).expect("foreign node");
    expect_code(graph.add_empty_node(&[foreign]), ErrorCode::InvalidValue);

    let first = graph.add_empty_node(&[]).expect("first");
    expect_code(graph.add_empty_node(&[first, first]), ErrorCode::InvalidValue);

    let doomed = graph.add_empty_node(&[]).expect("doomed");
    graph.destroy_node(doomed).expect("destroy");
    expect_code(graph.add_empty_node(&[doomed]), ErrorCode::InvalidValue);

    // Failed adds never leave a node behind.
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);

    let host = runtime.alloc_pageable(16).expect("host");
    let params = Memcpy1DParams::new(DevicePtr::NULL, host, 16, MemcpyKind::Default);
    expect_code(graph.add_memcpy_node_1d(&[first], params), ErrorCode::InvalidValue);
    assert_eq!(graph.node_count(), 1);
    assert!(graph.node_dependents(first).expect("dependents").is_empty());
}

pub fn add_dependencies_validates_edges(runtime: &Runtime) {
    let mut graph = runtime.create_graph();
    let a = graph.add_empty_node(&[]).expect("a");
    let b = graph.add_empty_node(&[]).expect("b");
    let c = graph.add_empty_node(&[]).expect("c");

    graph.add_dependencies(&[a, b], &[b, c]).expect("chain");
    assert_eq!(graph.edge_count(), 2);
    graph.add_dependencies(&[a], &[b]).expect("duplicate is a no-op");
    assert_eq!(graph.edge_count(), 2);

    expect_code(graph.add_dependencies(&[a], &[b, c]), ErrorCode::InvalidValue);
    expect_code(graph.add_dependencies(&[a], &[a]), ErrorCode::InvalidValue);
    expect_code(graph.add_dependencies(&[c], &[a]), ErrorCode::InvalidValue);
    // The valid first pair is not applied when a later pair fails.
    expect_code(graph.add_dependencies(&[a, c], &[c, a]), ErrorCode::InvalidValue);
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.root_nodes(), vec![a]);

    graph.remove_dependencies(&[b], &[c]).expect("remove");
    expect_code(graph.remove_dependencies(&[b], &[c]), ErrorCode::InvalidValue);
    assert_eq!(graph.root_nodes(), vec![a, c]);
}

pub fn clone_preserves_structure(runtime: &Runtime) {
    let buffers = VectorAddBuffers::new(runtime, N);
    let (graph, _) = vector_add_graph(runtime, &buffers);
    let clone = graph.clone_graph();

    assert_ne!(clone.id(), graph.id());
    assert_eq!(clone.node_count(), graph.node_count());
    assert_eq!(clone.edge_count(), graph.edge_count());
    for node in graph.nodes() {
        let twin = clone.find_in_clone(node).expect("counterpart exists");
        assert_ne!(twin, node);
        assert_eq!(clone.node_kind(twin).expect("kind"), graph.node_kind(node).expect("kind"));
        assert_eq!(
            clone.node_dependencies(twin).expect("deps").len(),
            graph.node_dependencies(node).expect("deps").len()
        );
        assert_eq!(
            clone.node_dependents(twin).expect("dependents").len(),
            graph.node_dependents(node).expect("dependents").len()
        );
        if let (NodeParams::Memcpy1D(lhs), NodeParams::Memcpy1D(rhs)) = (
            graph.node_params(node).expect("params"),
            clone.node_params(twin).expect("params"),
        ) {
            assert_eq!(lhs, rhs);
        }
    }
    // Clone handles are foreign to the original.
    let twin = clone.find_in_clone(graph.nodes()[0]).expect("twin");
    assert!(!graph.contains(twin));
    assert!(graph.find_in_clone(twin).is_none());

    // Nodes added after cloning have no counterpart, even when slot numbers line up.
    let mut graph = graph;
    let mut clone = clone;
    let only_in_original = graph.add_empty_node(&[]).expect("original-only node");
    let only_in_clone = clone.add_empty_node(&[]).expect("clone-only node");
    assert_eq!(only_in_original.slot(), only_in_clone.slot());
    assert!(clone.find_in_clone(only_in_original).is_none());
}

pub fn destroy_node_removes_edges(runtime: &Runtime) {
    let mut graph = runtime.create_graph();
    let a = graph.add_empty_node(&[]).expect("a");
    let b = graph.add_empty_node(&[a]).expect("b");
    let c = graph.add_empty_node(&[b]).expect("c");
    graph.destroy_node(b).expect("destroy");
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.root_nodes(), vec![a, c]);
    expect_code(graph.node_kind(b), ErrorCode::InvalidValue);

    let kernel: Arc<dyn graphrt::Kernel> = kernel_by_name(VECTOR_ADD_I32).expect("kernel");
    let missing = KernelNodeParams {
        kernel: None,
        ..KernelNodeParams::new(kernel, LaunchConfig::new(1, 1), Vec::new())
    };
    expect_code(graph.add_kernel_node(&[a], missing), ErrorCode::InvalidValue);
}
