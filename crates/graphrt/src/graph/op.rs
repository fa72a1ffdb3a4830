use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::trace;

use super::exec::ExecPlan;
use super::node::HostCallback;
use crate::error::{RuntimeError, RuntimeResult};
use crate::kernels::{Kernel, KernelArg, KernelContext, LaunchConfig};
use crate::memory::DevicePtr;
use crate::runtime::Runtime;

/// Resolved fill: `height` rows of `width` elements, `pitch` bytes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fill {
    pub(crate) dst: DevicePtr,
    pub(crate) pattern: [u8; 4],
    pub(crate) element_size: usize,
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) pitch: usize,
}

/// Validated unit of work, ready to run on a stream worker.
#[derive(Clone)]
pub(crate) enum Op {
    Empty,
    Host(HostCallback),
    Copy {
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    },
    Fill(Fill),
    Kernel {
        kernel: Arc<dyn Kernel>,
        config: LaunchConfig,
        args: Vec<KernelArg>,
    },
    Graph(Arc<ExecPlan>),
}

impl Op {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Op::Empty => "empty",
            Op::Host(_) => "host",
            Op::Copy { .. } => "memcpy",
            Op::Fill(_) => "memset",
            Op::Kernel { .. } => "kernel",
            Op::Graph(_) => "graph",
        }
    }

    pub(crate) fn execute(&self, runtime: &Runtime) -> RuntimeResult<()> {
        match self {
            Op::Empty => Ok(()),
            Op::Host(callback) => catch_unwind(AssertUnwindSafe(|| callback.call()))
                .map_err(|_| RuntimeError::launch_failure("host callback panicked")),
            Op::Copy { dst, src, bytes } => runtime.memory().copy(*dst, *src, *bytes),
            Op::Fill(fill) => {
                let pattern = &fill.pattern[..fill.element_size];
                for row in 0..fill.height {
                    runtime
                        .memory()
                        .fill(fill.dst.offset(row * fill.pitch), pattern, fill.width)?;
                }
                Ok(())
            }
            Op::Kernel {
                kernel,
                config,
                args,
            } => {
                trace!(kernel = kernel.name(), threads = config.total_threads(), "launch");
                let ctx = KernelContext::new(runtime, *config, kernel.name());
                catch_unwind(AssertUnwindSafe(|| kernel.execute(&ctx, args))).unwrap_or_else(
                    |_| {
                        Err(RuntimeError::launch_failure(format!(
                            "kernel {} panicked",
                            kernel.name()
                        )))
                    },
                )
            }
            Op::Graph(plan) => plan.execute(runtime),
        }
    }
}
