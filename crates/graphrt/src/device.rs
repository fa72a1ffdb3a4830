//! Per-thread current device selection.

use std::cell::Cell;

thread_local! {
    static CURRENT_DEVICE: Cell<u32> = const { Cell::new(0) };
}

pub(crate) fn current() -> u32 {
    CURRENT_DEVICE.with(Cell::get)
}

pub(crate) fn set_current(ordinal: u32) {
    CURRENT_DEVICE.with(|device| device.set(ordinal));
}

/// Static description of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    pub ordinal: u32,
    pub warp_size: u32,
    pub multiprocessor_count: u32,
    pub max_threads_per_block: u32,
    pub total_memory: usize,
}

/// RAII guard that restores the previously current device when dropped.
///
/// Created by [`Runtime::device_scope`](crate::Runtime::device_scope).
pub struct DeviceGuard {
    previous: u32,
}

impl DeviceGuard {
    pub(crate) fn switch(ordinal: u32) -> Self {
        let previous = current();
        set_current(ordinal);
        DeviceGuard { previous }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        set_current(self.previous);
    }
}
