use criterion::{criterion_group, criterion_main, Criterion};
use graphrt::kernels::{kernel_by_name, EMPTY_KERNEL};
use graphrt::{LaunchConfig, Runtime, RuntimeConfig};

fn dispatch_latency(c: &mut Criterion) {
    let runtime = Runtime::with_config(RuntimeConfig::default());
    let empty = kernel_by_name(EMPTY_KERNEL).expect("empty kernel is built in");
    let config = LaunchConfig::new(1, 1);
    let stream = runtime.create_stream().expect("stream");

    let mut group = c.benchmark_group("dispatch");
    group.bench_function("sync_launch", |b| {
        b.iter(|| runtime.launch_kernel(&empty, config, &[]))
    });
    group.bench_function("stream_launch_then_sync", |b| {
        b.iter(|| {
            stream.launch_kernel(&empty, config, &[])?;
            stream.synchronize()
        })
    });
    group.bench_function("stream_launch_batch_100", |b| {
        b.iter(|| {
            for _ in 0..100 {
                stream.launch_kernel(&empty, config, &[])?;
            }
            stream.synchronize()
        })
    });
    group.bench_function("graph_launch", |b| {
        let mut graph = runtime.create_graph();
        let params = graphrt::KernelNodeParams::new(empty.clone(), config, Vec::new());
        graph.add_kernel_node(&[], params).expect("kernel node");
        let exec = graph.instantiate().expect("instantiate");
        b.iter(|| {
            exec.launch(&stream)?;
            stream.synchronize()
        })
    });
    group.finish();
}

criterion_group!(benches, dispatch_latency);
criterion_main!(benches);
