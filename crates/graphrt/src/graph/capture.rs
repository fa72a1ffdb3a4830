//! Stream capture: turning work submitted to streams into a [`Graph`].
//!
//! A capture session starts on one stream and spreads to every stream that waits on an event
//! recorded inside the session. Each participating stream tracks its current tail nodes; a new
//! operation depends on the tails of the stream it is submitted to, and an event wait adds the
//! event's tails to the waiting stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use tracing::debug;

use super::node::{GraphNode, NodeParams};
use super::Graph;
use crate::error::{RuntimeError, RuntimeResult};
use crate::event::EventState;
use crate::runtime::Runtime;
use crate::stream::StreamShared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Unsafe calls are rejected from every thread while the capture is active.
    Global,
    /// Unsafe calls are rejected only on the thread that began the capture.
    ThreadLocal,
    /// No restriction on other calls.
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureStatus {
    None,
    Active,
    Invalidated,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionState {
    graph: Option<Graph>,
    invalidated: bool,
    participants: Vec<Weak<StreamShared>>,
}

pub(crate) struct CaptureSession {
    id: u64,
    origin: u64,
    mode: CaptureMode,
    thread: ThreadId,
    state: Mutex<SessionState>,
}

impl CaptureSession {
    fn lock(&self) -> RuntimeResult<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| RuntimeError::poisoned("capture session"))
    }

    pub(crate) fn invalidate(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.invalidated = true;
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.graph.is_some())
            .unwrap_or(false)
    }

    /// Whether a runtime-wide synchronisation on the current thread conflicts with this
    /// session.
    pub(crate) fn forbids_sync(&self) -> bool {
        match self.mode {
            CaptureMode::Global => true,
            CaptureMode::ThreadLocal => self.thread == thread::current().id(),
            CaptureMode::Relaxed => false,
        }
    }
}

/// Capture membership of one stream.
pub(crate) struct CaptureLink {
    session: Arc<CaptureSession>,
    tails: Vec<GraphNode>,
}

/// Capture position stored on an event recorded inside a session.
#[derive(Clone)]
pub(crate) struct CaptureMark {
    session: Arc<CaptureSession>,
    nodes: Vec<GraphNode>,
}

pub(crate) fn begin(
    runtime: &Runtime,
    stream: &Arc<StreamShared>,
    mode: CaptureMode,
) -> RuntimeResult<()> {
    let mut link = stream.lock_capture()?;
    if link.is_some() {
        return Err(RuntimeError::illegal_state("stream is already capturing"));
    }
    let session = Arc::new(CaptureSession {
        id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
        origin: stream.id(),
        mode,
        thread: thread::current().id(),
        state: Mutex::new(SessionState {
            graph: Some(Graph::new(runtime)),
            invalidated: false,
            participants: vec![Arc::downgrade(stream)],
        }),
    });
    runtime.register_capture(&session)?;
    debug!(stream = stream.id(), session = session.id, ?mode, "capture begun");
    *link = Some(CaptureLink {
        session,
        tails: Vec::new(),
    });
    Ok(())
}

pub(crate) fn is_capturing(stream: &StreamShared) -> bool {
    stream
        .lock_capture()
        .map(|link| link.is_some())
        .unwrap_or(false)
}

pub(crate) fn status(stream: &StreamShared) -> RuntimeResult<CaptureStatus> {
    let link = stream.lock_capture()?;
    let Some(link) = link.as_ref() else {
        return Ok(CaptureStatus::None);
    };
    if link.session.lock()?.invalidated {
        Ok(CaptureStatus::Invalidated)
    } else {
        Ok(CaptureStatus::Active)
    }
}

/// Rejects an operation that is illegal while `stream` captures, invalidating the capture.
pub(crate) fn reject_if_capturing(stream: &StreamShared, operation: &str) -> RuntimeResult<()> {
    let link = stream.lock_capture()?;
    if let Some(link) = link.as_ref() {
        link.session.invalidate();
        return Err(RuntimeError::capture_unsupported(format!(
            "{operation} on a capturing stream"
        )));
    }
    Ok(())
}

/// Records `params` as a node if `stream` is capturing; otherwise hands the params back.
pub(crate) fn record_node(
    stream: &StreamShared,
    params: NodeParams,
) -> RuntimeResult<Option<NodeParams>> {
    let mut guard = stream.lock_capture()?;
    let Some(link) = guard.as_mut() else {
        return Ok(Some(params));
    };
    let mut state = link.session.lock()?;
    if state.invalidated {
        return Err(RuntimeError::capture_invalidated(
            "capture was invalidated by an earlier error",
        ));
    }
    let Some(graph) = state.graph.as_mut() else {
        return Err(RuntimeError::capture_invalidated("capture has ended"));
    };
    match graph.add_node(&link.tails, params) {
        Ok(node) => {
            link.tails = vec![node];
            Ok(None)
        }
        Err(err) => {
            state.invalidated = true;
            Err(err)
        }
    }
}

/// Marks `event` with the capture position of `stream`. Returns false when not capturing.
pub(crate) fn record_event(stream: &StreamShared, event: &EventState) -> RuntimeResult<bool> {
    let link = stream.lock_capture()?;
    let Some(link) = link.as_ref() else {
        return Ok(false);
    };
    event.set_capture_mark(Some(CaptureMark {
        session: Arc::clone(&link.session),
        nodes: link.tails.clone(),
    }))?;
    Ok(true)
}

/// Applies an event wait inside a capture, joining `stream` to the event's session if
/// needed. Returns false when the wait is an ordinary one.
pub(crate) fn wait_event(stream: &Arc<StreamShared>, event: &EventState) -> RuntimeResult<bool> {
    let mark = event
        .capture_mark()?
        .filter(|mark| mark.session.is_active());
    let mut guard = stream.lock_capture()?;
    match (guard.as_mut(), mark) {
        (Some(link), Some(mark)) if Arc::ptr_eq(&link.session, &mark.session) => {
            for node in mark.nodes {
                if !link.tails.contains(&node) {
                    link.tails.push(node);
                }
            }
            Ok(true)
        }
        (Some(_), _) => Err(RuntimeError::illegal_state(
            "capturing stream cannot wait on an event recorded outside its capture",
        )),
        (None, Some(mark)) => {
            mark.session
                .lock()?
                .participants
                .push(Arc::downgrade(stream));
            debug!(stream = stream.id(), session = mark.session.id, "stream joined capture");
            *guard = Some(CaptureLink {
                session: mark.session,
                tails: mark.nodes,
            });
            Ok(true)
        }
        (None, None) => Ok(false),
    }
}

/// Ends the capture begun on `stream` and returns the recorded graph.
pub(crate) fn end(stream: &StreamShared) -> RuntimeResult<Graph> {
    let link = {
        let mut guard = stream.lock_capture()?;
        match guard.as_ref() {
            None => return Err(RuntimeError::illegal_state("stream is not capturing")),
            Some(link) if link.session.origin != stream.id() => {
                return Err(RuntimeError::illegal_state(
                    "capture must be ended on the stream that began it",
                ))
            }
            Some(_) => {}
        }
        match guard.take() {
            Some(link) => link,
            None => return Err(RuntimeError::illegal_state("stream is not capturing")),
        }
    };

    let (graph, invalidated, participants) = {
        let mut state = link.session.lock()?;
        (
            state.graph.take(),
            state.invalidated,
            std::mem::take(&mut state.participants),
        )
    };
    for participant in participants.iter().filter_map(Weak::upgrade) {
        if participant.id() == stream.id() {
            continue;
        }
        if let Ok(mut other) = participant.lock_capture() {
            let joined = other
                .as_ref()
                .is_some_and(|other| Arc::ptr_eq(&other.session, &link.session));
            if joined {
                *other = None;
            }
        }
    }

    if invalidated {
        return Err(RuntimeError::capture_invalidated(
            "capture was invalidated before it ended",
        ));
    }
    let graph =
        graph.ok_or_else(|| RuntimeError::capture_invalidated("capture has already ended"))?;
    if let Some(stray) = graph
        .leaf_nodes()
        .into_iter()
        .find(|leaf| !link.tails.contains(leaf))
    {
        return Err(RuntimeError::capture_unjoined(format!(
            "node {} was never joined back into the origin stream",
            stray.slot()
        )));
    }
    debug!(
        stream = stream.id(),
        session = link.session.id,
        nodes = graph.node_count(),
        "capture ended"
    );
    Ok(graph)
}
