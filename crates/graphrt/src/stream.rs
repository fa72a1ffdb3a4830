//! Ordered work queues backed by a worker thread each.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::{Event, EventState};
use crate::graph::capture::{self, CaptureLink, CaptureMode, CaptureStatus};
use crate::graph::op::Op;
use crate::graph::validate;
use crate::graph::{
    Graph, HostNodeParams, KernelNodeParams, Memcpy1DParams, MemcpyFromSymbolParams,
    MemcpyToSymbolParams, MemsetParams, NodeParams,
};
use crate::kernels::{Kernel, KernelArg, LaunchConfig};
use crate::memory::{DevicePtr, MemcpyKind};
use crate::runtime::Runtime;
use crate::symbol::SymbolHandle;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static WORKER_OF: Cell<u64> = const { Cell::new(0) };
}

/// Id of the stream whose worker is the current thread, if any.
pub(crate) fn current_worker() -> Option<u64> {
    match WORKER_OF.with(Cell::get) {
        0 => None,
        id => Some(id),
    }
}

enum Job {
    Run(Op),
    Record(Arc<EventState>, u64),
    Wait(Arc<EventState>, u64),
    Shutdown,
}

#[derive(Default)]
struct Progress {
    submitted: u64,
    completed: u64,
    error: Option<RuntimeError>,
    /// Set once the worker thread has exited, normally or by unwinding.
    stopped: bool,
}

/// State shared between a [`Stream`] handle, its worker and the runtime.
pub(crate) struct StreamShared {
    id: u64,
    progress: Mutex<Progress>,
    idle: Condvar,
    capture: Mutex<Option<CaptureLink>>,
}

impl StreamShared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn lock_progress(&self) -> RuntimeResult<MutexGuard<'_, Progress>> {
        self.progress
            .lock()
            .map_err(|_| RuntimeError::poisoned("stream progress"))
    }

    pub(crate) fn lock_capture(&self) -> RuntimeResult<MutexGuard<'_, Option<CaptureLink>>> {
        self.capture
            .lock()
            .map_err(|_| RuntimeError::poisoned("stream capture"))
    }

    fn failed(&self) -> bool {
        self.progress
            .lock()
            .map(|progress| progress.error.is_some())
            .unwrap_or(true)
    }

    fn finish(&self, error: Option<RuntimeError>) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.completed += 1;
            if let Some(err) = error {
                if progress.error.is_none() {
                    warn!(stream = self.id, error = %err, "stream work failed");
                    progress.error = Some(err);
                }
            }
        }
        self.idle.notify_all();
    }

    /// Blocks until everything submitted so far has run and reports the sticky error.
    pub(crate) fn wait_idle(&self) -> RuntimeResult<()> {
        let mut progress = self.lock_progress()?;
        let target = progress.submitted;
        while progress.completed < target && !progress.stopped {
            progress = self
                .idle
                .wait(progress)
                .map_err(|_| RuntimeError::poisoned("stream progress"))?;
        }
        if progress.completed < target {
            return Err(progress.error.clone().unwrap_or_else(|| {
                RuntimeError::illegal_state("stream worker stopped with work pending")
            }));
        }
        match &progress.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Marks the stream stopped when the worker exits, including by unwinding.
struct WorkerExit<'a>(&'a StreamShared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let mut progress = match self.0.progress.lock() {
            Ok(progress) => progress,
            Err(poisoned) => poisoned.into_inner(),
        };
        progress.stopped = true;
        drop(progress);
        self.0.idle.notify_all();
    }
}

fn run_op(runtime: &Runtime, op: &Op) -> Option<RuntimeError> {
    match catch_unwind(AssertUnwindSafe(|| op.execute(runtime))) {
        Ok(result) => result.err(),
        Err(_) => Some(RuntimeError::launch_failure(format!(
            "{} work panicked",
            op.label()
        ))),
    }
}

fn worker_loop(runtime: Runtime, shared: Arc<StreamShared>, jobs: Receiver<Job>) {
    WORKER_OF.with(|worker| worker.set(shared.id));
    let _exit = WorkerExit(&shared);
    debug!(stream = shared.id, "stream worker started");
    while let Ok(job) = jobs.recv() {
        let outcome = match job {
            Job::Run(op) if !shared.failed() => run_op(&runtime, &op),
            Job::Run(_) => None,
            Job::Record(event, epoch) => {
                event.complete(epoch);
                None
            }
            Job::Wait(event, epoch) => event.wait_for(epoch).err(),
            Job::Shutdown => break,
        };
        shared.finish(outcome);
    }
    debug!(stream = shared.id, "stream worker stopped");
}

/// In-order work queue.
///
/// Work runs on a dedicated worker thread in submission order. Host callbacks run on that
/// worker and must not submit to or synchronise their own stream.
pub struct Stream {
    runtime: Runtime,
    shared: Arc<StreamShared>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn new(runtime: &Runtime) -> RuntimeResult<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(StreamShared {
            id,
            progress: Mutex::new(Progress::default()),
            idle: Condvar::new(),
            capture: Mutex::new(None),
        });
        let (jobs, receiver) = mpsc::channel();
        let worker = {
            let runtime = runtime.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("graphrt-stream-{id}"))
                .spawn(move || worker_loop(runtime, shared, receiver))
                .map_err(|err| {
                    RuntimeError::illegal_state(format!("failed to spawn stream worker: {err}"))
                })?
        };
        runtime.register_stream(&shared)?;
        Ok(Self {
            runtime: runtime.clone(),
            shared,
            jobs,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn ensure_not_own_worker(&self, operation: &str) -> RuntimeResult<()> {
        if current_worker() == Some(self.shared.id) {
            return Err(RuntimeError::illegal_state(format!(
                "{operation} from a callback running on the same stream"
            )));
        }
        Ok(())
    }

    fn push(&self, job: Job) -> RuntimeResult<()> {
        self.ensure_not_own_worker("submission")?;
        self.shared.lock_progress()?.submitted += 1;
        if self.jobs.send(job).is_err() {
            self.shared.lock_progress()?.submitted -= 1;
            return Err(RuntimeError::illegal_state("stream worker has stopped"));
        }
        Ok(())
    }

    pub(crate) fn submit_op(&self, op: Op) -> RuntimeResult<()> {
        self.push(Job::Run(op))
    }

    /// Validates `params` and either records them into the active capture or enqueues them.
    pub(crate) fn submit(&self, params: NodeParams) -> RuntimeResult<()> {
        self.ensure_not_own_worker("submission")?;
        let Some(params) = capture::record_node(&self.shared, params)? else {
            return Ok(());
        };
        let compiled = validate::compile(&self.runtime, &params)?;
        self.push(Job::Run(compiled.op))
    }

    pub fn memcpy_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
        kind: MemcpyKind,
    ) -> RuntimeResult<()> {
        self.submit(NodeParams::Memcpy1D(Memcpy1DParams::new(dst, src, bytes, kind)))
    }

    /// Byte-wise fill of `bytes` bytes.
    pub fn memset_async(&self, dst: DevicePtr, value: u8, bytes: usize) -> RuntimeResult<()> {
        self.submit(NodeParams::Memset(MemsetParams::d8(dst, value, bytes)))
    }

    pub fn memset_2d_async(&self, params: MemsetParams) -> RuntimeResult<()> {
        self.submit(NodeParams::Memset(params))
    }

    pub fn launch_kernel(
        &self,
        kernel: &Arc<dyn Kernel>,
        config: LaunchConfig,
        args: &[KernelArg],
    ) -> RuntimeResult<()> {
        self.submit(NodeParams::Kernel(KernelNodeParams::new(
            Arc::clone(kernel),
            config,
            args.to_vec(),
        )))
    }

    pub fn launch_host_func(&self, func: impl Fn() + Send + Sync + 'static) -> RuntimeResult<()> {
        self.submit(NodeParams::Host(HostNodeParams::new(func)))
    }

    pub fn memcpy_to_symbol_async(
        &self,
        symbol: SymbolHandle,
        src: DevicePtr,
        bytes: usize,
        offset: usize,
        kind: MemcpyKind,
    ) -> RuntimeResult<()> {
        self.submit(NodeParams::MemcpyToSymbol(MemcpyToSymbolParams::new(
            symbol, src, bytes, offset, kind,
        )))
    }

    pub fn memcpy_from_symbol_async(
        &self,
        dst: DevicePtr,
        symbol: SymbolHandle,
        bytes: usize,
        offset: usize,
        kind: MemcpyKind,
    ) -> RuntimeResult<()> {
        self.submit(NodeParams::MemcpyFromSymbol(MemcpyFromSymbolParams::new(
            dst, symbol, bytes, offset, kind,
        )))
    }

    pub fn record_event(&self, event: &Event) -> RuntimeResult<()> {
        self.ensure_not_own_worker("event record")?;
        if capture::record_event(&self.shared, event.state())? {
            return Ok(());
        }
        let epoch = event.state().begin_record()?;
        self.push(Job::Record(Arc::clone(event.state()), epoch))
    }

    /// Makes later work on this stream wait until `event`'s latest record has completed.
    pub fn wait_event(&self, event: &Event) -> RuntimeResult<()> {
        self.ensure_not_own_worker("event wait")?;
        if capture::wait_event(&self.shared, event.state())? {
            return Ok(());
        }
        let epoch = event.state().wait_target()?;
        if epoch == 0 {
            return Ok(());
        }
        self.push(Job::Wait(Arc::clone(event.state()), epoch))
    }

    pub fn synchronize(&self) -> RuntimeResult<()> {
        self.ensure_not_own_worker("synchronize")?;
        capture::reject_if_capturing(&self.shared, "synchronize")?;
        self.shared.wait_idle()
    }

    /// `Ok` when idle, `NotReady` while work is pending, or the sticky error.
    pub fn query(&self) -> RuntimeResult<()> {
        capture::reject_if_capturing(&self.shared, "query")?;
        let progress = self.shared.lock_progress()?;
        if progress.completed < progress.submitted {
            if !progress.stopped {
                return Err(RuntimeError::not_ready());
            }
            if progress.error.is_none() {
                return Err(RuntimeError::illegal_state(
                    "stream worker stopped with work pending",
                ));
            }
        }
        match &progress.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn begin_capture(&self, mode: CaptureMode) -> RuntimeResult<()> {
        capture::begin(&self.runtime, &self.shared, mode)
    }

    pub fn end_capture(&self) -> RuntimeResult<Graph> {
        capture::end(&self.shared)
    }

    pub fn capture_status(&self) -> RuntimeResult<CaptureStatus> {
        capture::status(&self.shared)
    }

    pub fn is_capturing(&self) -> bool {
        capture::is_capturing(&self.shared)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if current_worker() != Some(self.shared.id) {
                let _ = worker.join();
            }
        }
    }
}
