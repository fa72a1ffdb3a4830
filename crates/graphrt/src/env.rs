use std::env;
use std::sync::OnceLock;

pub(crate) const DEFAULT_DEVICE_COUNT: usize = 1;
pub(crate) const DEFAULT_WARP_SIZE: u32 = 32;
pub(crate) const DEFAULT_DEVICE_MEMORY_MB: usize = 1024;

static GRAPHRT_DEVICE_COUNT: OnceLock<usize> = OnceLock::new();
static GRAPHRT_WARP_SIZE: OnceLock<u32> = OnceLock::new();
static GRAPHRT_DEVICE_MEMORY_MB: OnceLock<usize> = OnceLock::new();

fn parse_positive(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|value| *value > 0)
}

fn read_positive(name: &str) -> Option<usize> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_positive(&value),
        _ => None,
    }
}

pub(crate) fn device_count() -> usize {
    *GRAPHRT_DEVICE_COUNT
        .get_or_init(|| read_positive("GRAPHRT_DEVICE_COUNT").unwrap_or(DEFAULT_DEVICE_COUNT))
}

pub(crate) fn warp_size() -> u32 {
    *GRAPHRT_WARP_SIZE.get_or_init(|| {
        read_positive("GRAPHRT_WARP_SIZE")
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| value.is_power_of_two())
            .unwrap_or(DEFAULT_WARP_SIZE)
    })
}

pub(crate) fn device_memory_mb() -> usize {
    *GRAPHRT_DEVICE_MEMORY_MB.get_or_init(|| {
        read_positive("GRAPHRT_DEVICE_MEMORY_MB").unwrap_or(DEFAULT_DEVICE_MEMORY_MB)
    })
}

#[cfg(test)]
mod tests {
    use super::parse_positive;

    #[test]
    fn parse_positive_rejects_zero_and_garbage() {
        assert_eq!(parse_positive(" 4 "), Some(4));
        assert_eq!(parse_positive("0"), None);
        assert_eq!(parse_positive("-1"), None);
        assert_eq!(parse_positive("lots"), None);
    }
}
