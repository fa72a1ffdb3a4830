use std::time::Instant;

use anyhow::Result;
use graphrt::{AllocationKind, Runtime};
use tracing::debug;

use super::report::{gib_per_s, ThroughputRow};

pub const SIZES: [usize; 3] = [4 << 10, 4 << 20, 16 << 20];
pub const KINDS: [AllocationKind; 3] = [
    AllocationKind::Device,
    AllocationKind::Pinned,
    AllocationKind::Managed,
];

fn label(kind: AllocationKind) -> &'static str {
    match kind {
        AllocationKind::Pageable => "pageable",
        AllocationKind::Pinned => "pinned",
        AllocationKind::Device => "device",
        AllocationKind::Managed => "managed",
    }
}

/// Synchronous `memset_d8` throughput for each allocation kind and size.
pub fn run(runtime: &Runtime, iterations: usize) -> Result<Vec<ThroughputRow>> {
    let iterations = iterations.max(1);
    let mut rows = Vec::with_capacity(KINDS.len() * SIZES.len());
    for kind in KINDS {
        for bytes in SIZES {
            let ptr = runtime.alloc(kind, bytes)?;
            runtime.memset_d8(ptr, 0, bytes)?;
            let start = Instant::now();
            for i in 0..iterations {
                runtime.memset_d8(ptr, i as u8, bytes)?;
            }
            let mean_us = start.elapsed().as_secs_f64() * 1e6 / iterations as f64;
            runtime.free(ptr)?;
            debug!(kind = label(kind), bytes, mean_us, "measured memset");
            rows.push(ThroughputRow {
                allocation: label(kind).to_string(),
                bytes,
                mean_us,
                gib_per_s: gib_per_s(bytes, mean_us),
            });
        }
    }
    Ok(rows)
}
