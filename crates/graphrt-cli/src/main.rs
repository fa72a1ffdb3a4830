//! `graphrt` command-line tool.
//!
//! # Commands
//!
//! - `latency` - empty-kernel dispatch latency
//! - `memset` - `memset_d8` throughput per allocation kind
//! - `bench` - both of the above
//! - `kernels` - list registered kernels
//! - `devices` - show simulated device properties

mod benchmark;

use anyhow::Result;
use clap::{Parser, Subcommand};
use graphrt::{Runtime, RuntimeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use benchmark::report::{format_bytes, Report};

#[derive(Parser)]
#[command(name = "graphrt")]
#[command(version, about = "Benchmarks and inspection for the graphrt runtime", long_about = None)]
struct Cli {
    /// Print the report as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    /// Number of simulated devices (defaults to GRAPHRT_DEVICE_COUNT)
    #[arg(long, global = true)]
    devices: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Measure dispatch latency of an empty kernel
    Latency {
        /// Samples per measurement
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: usize,
    },
    /// Measure memset throughput for device, pinned and managed memory
    Memset {
        /// Fills per allocation
        #[arg(short = 'n', long, default_value_t = 20)]
        iterations: usize,
    },
    /// Run every benchmark
    Bench {
        #[arg(long, default_value_t = 1000)]
        latency_iterations: usize,
        #[arg(long, default_value_t = 20)]
        memset_iterations: usize,
    },
    /// List registered kernels
    Kernels,
    /// Show device properties
    Devices,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_table());
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(devices) = cli.devices {
        config = config.with_device_count(devices);
    }
    let runtime = Runtime::with_config(config);
    info!(devices = runtime.device_count(), "runtime ready");

    match cli.command {
        Command::Latency { iterations } => {
            let report = Report {
                latency: benchmark::latency::run(&runtime, iterations)?,
                ..Report::default()
            };
            print_report(&report, cli.json)
        }
        Command::Memset { iterations } => {
            let report = Report {
                memset: benchmark::memset::run(&runtime, iterations)?,
                ..Report::default()
            };
            print_report(&report, cli.json)
        }
        Command::Bench {
            latency_iterations,
            memset_iterations,
        } => {
            let report = Report {
                latency: benchmark::latency::run(&runtime, latency_iterations)?,
                memset: benchmark::memset::run(&runtime, memset_iterations)?,
            };
            print_report(&report, cli.json)
        }
        Command::Kernels => {
            for name in graphrt::kernels::list_kernels() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Devices => {
            for ordinal in 0..runtime.device_count() as u32 {
                let props = runtime.device_properties(ordinal)?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "ordinal": props.ordinal,
                            "name": props.name,
                            "warp_size": props.warp_size,
                            "multiprocessor_count": props.multiprocessor_count,
                            "max_threads_per_block": props.max_threads_per_block,
                            "total_memory": props.total_memory,
                        })
                    );
                } else {
                    println!(
                        "{}: {} (warp {}, {} SMs, {} threads/block, {})",
                        props.ordinal,
                        props.name,
                        props.warp_size,
                        props.multiprocessor_count,
                        props.max_threads_per_block,
                        format_bytes(props.total_memory)
                    );
                }
            }
            Ok(())
        }
    }
}
