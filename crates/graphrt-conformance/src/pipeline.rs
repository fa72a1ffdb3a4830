//! End-to-end pipelines: build or capture a graph, launch it and check the data.

use std::fmt::Debug;

use graphrt::kernels::{
    kernel_by_name, BitWord, BIT_EXTRACT_U32, BIT_EXTRACT_U64, BIT_INSERT_U32, BIT_INSERT_U64,
    VECTOR_SQUARE_F32,
};
use graphrt::{
    AllocationKind, CaptureMode, CaptureStatus, DeviceBuffer, Event, KernelArg, LaunchConfig,
    MemcpyKind, MemsetParams, NodeKind, Runtime,
};
use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::graph::{vector_add_graph as build_vector_add, VectorAddBuffers};

const N: usize = 1024;
const BLOCK: u32 = 256;

pub fn vector_add_graph(runtime: &Runtime) {
    let buffers = VectorAddBuffers::new(runtime, N);
    let (graph, roots) = build_vector_add(runtime, &buffers);
    assert_eq!(graph.root_nodes(), roots.to_vec());

    let exec = graph.instantiate().expect("instantiate");
    let stream = runtime.create_stream().expect("stream");
    exec.launch(&stream).expect("launch");
    stream.synchronize().expect("synchronize");

    let a: Vec<i32> = runtime.read(buffers.a_host, N).expect("a");
    let b: Vec<i32> = runtime.read(buffers.b_host, N).expect("b");
    let c: Vec<i32> = runtime.read(buffers.c_host, N).expect("c");
    for i in 0..N {
        assert_eq!(c[i], a[i] + b[i], "element {i}");
    }
}

/// Fork two side streams off a capturing stream, join them back, and replay the capture.
pub fn captured_fork_join(runtime: &Runtime) {
    let bytes = N * std::mem::size_of::<f32>();
    let input: Vec<f32> = (0..N).map(|i| i as f32 * 0.5).collect();
    let a_host = DeviceBuffer::from_slice(runtime, AllocationKind::Pinned, &input).expect("a_host");
    let c_host = DeviceBuffer::<f32>::new(runtime, AllocationKind::Pinned, N).expect("c_host");
    let a_dev = DeviceBuffer::<f32>::new(runtime, AllocationKind::Device, N).expect("a_dev");
    let c_dev = DeviceBuffer::<f32>::new(runtime, AllocationKind::Device, N).expect("c_dev");
    let square = kernel_by_name(VECTOR_SQUARE_F32).expect("vector_square_f32 is built in");

    let main = runtime.create_stream().expect("main");
    let side1 = runtime.create_stream().expect("side1");
    let side2 = runtime.create_stream().expect("side2");
    let fork = Event::new();
    let joined1 = Event::new();
    let joined2 = Event::new();

    main.begin_capture(CaptureMode::Global).expect("begin capture");
    main.record_event(&fork).expect("fork");
    side1.wait_event(&fork).expect("side1 joins");
    side2.wait_event(&fork).expect("side2 joins");
    assert_eq!(side1.capture_status().expect("status"), CaptureStatus::Active);

    side1.memset_async(a_dev.ptr(), 0, bytes).expect("clear a");
    side2.memset_async(c_dev.ptr(), 0, bytes).expect("clear c");
    side1.record_event(&joined1).expect("side1 done");
    side2.record_event(&joined2).expect("side2 done");
    main.wait_event(&joined1).expect("join side1");
    main.wait_event(&joined2).expect("join side2");

    main.memcpy_async(a_dev.ptr(), a_host.ptr(), bytes, MemcpyKind::HostToDevice)
        .expect("upload");
    main.launch_kernel(
        &square,
        LaunchConfig::for_elements(N, BLOCK),
        &[
            KernelArg::Ptr(a_dev.ptr()),
            KernelArg::Ptr(c_dev.ptr()),
            KernelArg::Usize(N),
        ],
    )
    .expect("square");
    main.memcpy_async(c_host.ptr(), c_dev.ptr(), bytes, MemcpyKind::DeviceToHost)
        .expect("download");
    let graph = main.end_capture().expect("end capture");

    // Nothing ran while capturing.
    assert!(c_host.read().expect("c").iter().all(|v| *v == 0.0));
    assert!(!side1.is_capturing());
    assert_eq!(graph.node_count(), 5);
    let roots = graph.root_nodes();
    assert_eq!(roots.len(), 2);
    for root in roots {
        assert_eq!(graph.node_kind(root).expect("kind"), NodeKind::Memset);
    }

    let exec = graph.instantiate().expect("instantiate");
    exec.launch(&main).expect("launch");
    main.synchronize().expect("synchronize");
    let out = c_host.read().expect("c");
    for (i, (x, y)) in input.iter().zip(&out).enumerate() {
        assert_eq!(*y, x * x, "element {i}");
    }
}

pub fn memset_fills_every_allocation_kind(runtime: &Runtime) {
    let kinds = [
        AllocationKind::Device,
        AllocationKind::Pinned,
        AllocationKind::Managed,
    ];
    for kind in kinds {
        let bytes = DeviceBuffer::<u8>::new(runtime, kind, N).expect("bytes");
        runtime.memset_d8(bytes.ptr(), 0xa5, N).expect("memset d8");
        assert_eq!(bytes.read().expect("read"), vec![0xa5u8; N], "{kind:?}");

        let halves = DeviceBuffer::<u16>::new(runtime, kind, N).expect("halves");
        runtime.memset_d16(halves.ptr(), 0xbeef, N).expect("memset d16");
        assert_eq!(halves.read().expect("read"), vec![0xbeefu16; N], "{kind:?}");

        let words = DeviceBuffer::<u32>::new(runtime, kind, N).expect("words");
        runtime.memset_d32(words.ptr(), 0xdead_beef, N).expect("memset d32");
        assert_eq!(words.read().expect("read"), vec![0xdead_beefu32; N], "{kind:?}");

        // The same fill as a graph node over the second half only.
        let mut graph = runtime.create_graph();
        graph
            .add_memset_node(&[], MemsetParams::d32(words.element_ptr(N / 2), 7, N / 2))
            .expect("memset node");
        let stream = runtime.create_stream().expect("stream");
        graph.instantiate().expect("instantiate").launch(&stream).expect("launch");
        stream.synchronize().expect("synchronize");
        let words = words.read().expect("read");
        assert!(words[..N / 2].iter().all(|w| *w == 0xdead_beef), "{kind:?}");
        assert!(words[N / 2..].iter().all(|w| *w == 7), "{kind:?}");
    }
}

fn exact_launch() -> LaunchConfig {
    LaunchConfig::new((N as u32) / BLOCK, BLOCK)
}

fn random_fields(rng: &mut StdRng, bits: u32) -> (Vec<u32>, Vec<u32>) {
    let offsets = (0..N).map(|_| rng.gen_range(0..bits)).collect();
    let widths = (0..N).map(|_| rng.gen_range(0..bits)).collect();
    (offsets, widths)
}

fn bit_extract<W>(runtime: &Runtime, kernel: &str, bits: u32, seed: u64)
where
    W: BitWord + PartialEq + Debug,
    Standard: Distribution<W>,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let src0: Vec<W> = (0..N).map(|_| rng.gen()).collect();
    let (offsets, widths) = random_fields(&mut rng, bits);

    let out = DeviceBuffer::<W>::new(runtime, AllocationKind::Device, N).expect("out");
    let src0_dev = DeviceBuffer::from_slice(runtime, AllocationKind::Device, &src0).expect("src0");
    let offsets_dev =
        DeviceBuffer::from_slice(runtime, AllocationKind::Device, &offsets).expect("offsets");
    let widths_dev =
        DeviceBuffer::from_slice(runtime, AllocationKind::Device, &widths).expect("widths");

    let stream = runtime.create_stream().expect("stream");
    let kernel = kernel_by_name(kernel).expect("bit extract kernel is built in");
    stream
        .launch_kernel(
            &kernel,
            exact_launch(),
            &[
                out.ptr().into(),
                src0_dev.ptr().into(),
                offsets_dev.ptr().into(),
                widths_dev.ptr().into(),
            ],
        )
        .expect("launch");
    stream.synchronize().expect("synchronize");

    let got = out.read().expect("read");
    for x in 0..N {
        assert_eq!(got[x], src0[x].extract(offsets[x], widths[x]), "element {x}");
    }
}

pub fn bit_extract_matches_reference(runtime: &Runtime) {
    bit_extract::<u32>(runtime, BIT_EXTRACT_U32, 32, 0x5eed);
    bit_extract::<u64>(runtime, BIT_EXTRACT_U64, 64, 0x5eed + 1);
}

fn bit_insert<W>(runtime: &Runtime, kernel: &str, bits: u32, seed: u64)
where
    W: BitWord + PartialEq + Debug,
    Standard: Distribution<W>,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let src0: Vec<W> = (0..N).map(|_| rng.gen()).collect();
    let src1: Vec<W> = (0..N).map(|_| rng.gen()).collect();
    let (offsets, widths) = random_fields(&mut rng, bits);

    let out = DeviceBuffer::<W>::new(runtime, AllocationKind::Device, N).expect("out");
    let src0_dev = DeviceBuffer::from_slice(runtime, AllocationKind::Device, &src0).expect("src0");
    let src1_dev = DeviceBuffer::from_slice(runtime, AllocationKind::Device, &src1).expect("src1");
    let offsets_dev =
        DeviceBuffer::from_slice(runtime, AllocationKind::Device, &offsets).expect("offsets");
    let widths_dev =
        DeviceBuffer::from_slice(runtime, AllocationKind::Device, &widths).expect("widths");

    let kernel = kernel_by_name(kernel).expect("bit insert kernel is built in");
    let mut graph = runtime.create_graph();
    graph
        .add_kernel_node(
            &[],
            graphrt::KernelNodeParams::new(
                kernel,
                exact_launch(),
                vec![
                    out.ptr().into(),
                    src0_dev.ptr().into(),
                    src1_dev.ptr().into(),
                    offsets_dev.ptr().into(),
                    widths_dev.ptr().into(),
                ],
            ),
        )
        .expect("kernel node");
    let stream = runtime.create_stream().expect("stream");
    graph.instantiate().expect("instantiate").launch(&stream).expect("launch");
    stream.synchronize().expect("synchronize");

    let got = out.read().expect("read");
    for x in 0..N {
        assert_eq!(
            got[x],
            src0[x].insert(src1[x], offsets[x], widths[x]),
            "element {x}"
        );
    }
}

pub fn bit_insert_matches_reference(runtime: &Runtime) {
    bit_insert::<u32>(runtime, BIT_INSERT_U32, 32, 0xb17);
    bit_insert::<u64>(runtime, BIT_INSERT_U64, 64, 0xb17 + 1);
}
