use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use graphrt::kernels::{kernel_by_name, EMPTY_KERNEL};
use graphrt::{Kernel, KernelNodeParams, LaunchConfig, Runtime, RuntimeResult};
use tracing::debug;

use super::report::{summarize, LatencyRow};

fn micros(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e6
}

fn time_once(op: impl FnOnce() -> RuntimeResult<()>) -> Result<f64> {
    let start = Instant::now();
    op()?;
    Ok(micros(start))
}

fn sample(iterations: usize, mut op: impl FnMut() -> RuntimeResult<()>) -> Result<Vec<f64>> {
    (0..iterations).map(|_| time_once(&mut op)).collect()
}

fn row(name: &str, samples: &[f64]) -> Result<LatencyRow> {
    let summary = summarize(samples).ok_or_else(|| anyhow!("{name}: no samples"))?;
    debug!(name, median_us = summary.median_us, "measured dispatch latency");
    Ok(LatencyRow {
        name: name.to_string(),
        summary,
    })
}

/// Empty-kernel dispatch latency on the null and user streams, plus graph launch.
pub fn run(runtime: &Runtime, iterations: usize) -> Result<Vec<LatencyRow>> {
    let iterations = iterations.max(1);
    let empty: Arc<dyn Kernel> =
        kernel_by_name(EMPTY_KERNEL).ok_or_else(|| anyhow!("kernel {EMPTY_KERNEL} is missing"))?;
    let config = LaunchConfig::new(1, 1);
    let stream = runtime.create_stream()?;
    let mut rows = Vec::new();

    let launch_and_sync = || {
        stream.launch_kernel(&empty, config, &[])?;
        stream.synchronize()
    };
    rows.push(row("first_launch", &[time_once(launch_and_sync)?])?);
    rows.push(row("second_launch", &[time_once(launch_and_sync)?])?);

    let null_sync = sample(iterations, || runtime.launch_kernel(&empty, config, &[]))?;
    rows.push(row("sync_dispatch_null_stream", &null_sync)?);

    let user_sync = sample(iterations, launch_and_sync)?;
    rows.push(row("sync_dispatch_user_stream", &user_sync)?);

    let user_async = sample(iterations, || stream.launch_kernel(&empty, config, &[]))?;
    stream.synchronize()?;
    rows.push(row("async_dispatch_user_stream", &user_async)?);

    let mut graph = runtime.create_graph();
    graph.add_kernel_node(&[], KernelNodeParams::new(empty.clone(), config, Vec::new()))?;
    let exec = graph.instantiate()?;
    let graph_launch = sample(iterations, || {
        exec.launch(&stream)?;
        stream.synchronize()
    })?;
    rows.push(row("graph_launch_user_stream", &graph_launch)?);

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_iterations_still_takes_a_sample() {
        let runtime = Runtime::new();
        let rows = run(&runtime, 0).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|row| row.summary.samples == 1));
    }
}
