use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::capture::CaptureMark;
use crate::stream::Stream;

struct EventInner {
    recorded: u64,
    completed: u64,
    timestamp: Option<Instant>,
    capture: Option<CaptureMark>,
}

/// Shared state between an [`Event`] and the stream workers that complete it.
///
/// Every record bumps `recorded`; the worker sets `completed` to that epoch once all work
/// submitted before the record has run.
pub(crate) struct EventState {
    inner: Mutex<EventInner>,
    completed: Condvar,
}

impl EventState {
    fn lock(&self) -> RuntimeResult<MutexGuard<'_, EventInner>> {
        self.inner.lock().map_err(|_| RuntimeError::poisoned("event"))
    }

    /// Starts a new record epoch. Recording outside a capture clears any capture mark.
    pub(crate) fn begin_record(&self) -> RuntimeResult<u64> {
        let mut inner = self.lock()?;
        inner.recorded += 1;
        inner.capture = None;
        Ok(inner.recorded)
    }

    /// Epoch a wait submitted now has to observe.
    pub(crate) fn wait_target(&self) -> RuntimeResult<u64> {
        Ok(self.lock()?.recorded)
    }

    pub(crate) fn complete(&self, epoch: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            if epoch > inner.completed {
                inner.completed = epoch;
                inner.timestamp = Some(Instant::now());
            }
            self.completed.notify_all();
        }
    }

    pub(crate) fn wait_for(&self, epoch: u64) -> RuntimeResult<()> {
        let mut inner = self.lock()?;
        while inner.completed < epoch {
            inner = self
                .completed
                .wait(inner)
                .map_err(|_| RuntimeError::poisoned("event"))?;
        }
        Ok(())
    }

    pub(crate) fn set_capture_mark(&self, mark: Option<CaptureMark>) -> RuntimeResult<()> {
        self.lock()?.capture = mark;
        Ok(())
    }

    pub(crate) fn capture_mark(&self) -> RuntimeResult<Option<CaptureMark>> {
        Ok(self.lock()?.capture.clone())
    }
}

/// Marker in a stream's work queue used for cross-stream ordering and timing.
#[derive(Clone)]
pub struct Event {
    state: Arc<EventState>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EventState {
                inner: Mutex::new(EventInner {
                    recorded: 0,
                    completed: 0,
                    timestamp: None,
                    capture: None,
                }),
                completed: Condvar::new(),
            }),
        }
    }

    pub(crate) fn state(&self) -> &Arc<EventState> {
        &self.state
    }

    pub fn record(&self, stream: &Stream) -> RuntimeResult<()> {
        stream.record_event(self)
    }

    /// Blocks until the most recent record has completed. Never-recorded events are complete.
    pub fn synchronize(&self) -> RuntimeResult<()> {
        let target = self.state.wait_target()?;
        self.state.wait_for(target)
    }

    pub fn query(&self) -> RuntimeResult<()> {
        let inner = self.state.lock()?;
        if inner.completed < inner.recorded {
            return Err(RuntimeError::not_ready());
        }
        Ok(())
    }

    /// Milliseconds between the completion of `start` and of `stop`.
    pub fn elapsed_ms(start: &Event, stop: &Event) -> RuntimeResult<f32> {
        let begin = start.timestamp()?;
        let end = stop.timestamp()?;
        let millis = match end.checked_duration_since(begin) {
            Some(elapsed) => elapsed.as_secs_f32() * 1000.0,
            None => -(begin.duration_since(end).as_secs_f32() * 1000.0),
        };
        Ok(millis)
    }

    fn timestamp(&self) -> RuntimeResult<Instant> {
        let inner = self.state.lock()?;
        if inner.recorded == 0 {
            return Err(RuntimeError::invalid_handle("event has not been recorded"));
        }
        if inner.completed < inner.recorded {
            return Err(RuntimeError::not_ready());
        }
        inner
            .timestamp
            .ok_or_else(|| RuntimeError::invalid_handle("event has no timestamp"))
    }
}
