use crate::env;

/// Shape of the simulated machine a [`Runtime`](crate::Runtime) is created for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub device_count: usize,
    pub warp_size: u32,
    pub device_memory_bytes: usize,
    pub multiprocessor_count: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_count: env::DEFAULT_DEVICE_COUNT,
            warp_size: env::DEFAULT_WARP_SIZE,
            device_memory_bytes: env::DEFAULT_DEVICE_MEMORY_MB << 20,
            multiprocessor_count: 8,
        }
    }
}

impl RuntimeConfig {
    /// Reads `GRAPHRT_DEVICE_COUNT`, `GRAPHRT_WARP_SIZE` and `GRAPHRT_DEVICE_MEMORY_MB`,
    /// falling back to the defaults for unset or malformed values.
    pub fn from_env() -> Self {
        Self {
            device_count: env::device_count(),
            warp_size: env::warp_size(),
            device_memory_bytes: env::device_memory_mb() << 20,
            ..Self::default()
        }
    }

    pub fn with_device_count(mut self, device_count: usize) -> Self {
        self.device_count = device_count.max(1);
        self
    }

    pub fn with_warp_size(mut self, warp_size: u32) -> Self {
        self.warp_size = warp_size;
        self
    }

    pub fn with_device_memory_bytes(mut self, bytes: usize) -> Self {
        self.device_memory_bytes = bytes;
        self
    }
}
