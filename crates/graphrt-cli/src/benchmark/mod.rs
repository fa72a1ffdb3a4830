pub mod latency;
pub mod memset;
pub mod report;
