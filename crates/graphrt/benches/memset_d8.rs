use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphrt::{AllocationKind, Runtime, RuntimeConfig};

const SIZES: [(usize, &str); 3] = [(4 << 10, "4KiB"), (4 << 20, "4MiB"), (16 << 20, "16MiB")];

const KINDS: [(AllocationKind, &str); 3] = [
    (AllocationKind::Device, "device"),
    (AllocationKind::Pinned, "pinned"),
    (AllocationKind::Managed, "managed"),
];

fn memset_d8(c: &mut Criterion) {
    let runtime = Runtime::with_config(RuntimeConfig::default());
    let mut group = c.benchmark_group("memset_d8");
    for (kind, kind_name) in KINDS {
        for (bytes, size_name) in SIZES {
            let ptr = runtime.alloc(kind, bytes).expect("allocation");
            group.throughput(Throughput::Bytes(bytes as u64));
            group.bench_with_input(BenchmarkId::new(kind_name, size_name), &bytes, |b, &bytes| {
                b.iter(|| runtime.memset_d8(ptr, 0x5a, bytes))
            });
            runtime.free(ptr).expect("free");
        }
    }
    group.finish();
}

criterion_group!(benches, memset_d8);
criterion_main!(benches);
