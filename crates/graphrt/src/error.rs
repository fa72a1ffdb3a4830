use std::fmt;

use thiserror::Error;

/// Status codes reported by every runtime entry point.
///
/// Numeric values follow the CUDA runtime numbering so that the C surface can hand them out
/// unchanged.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success = 0,
    InvalidValue = 1,
    OutOfMemory = 2,
    InvalidSymbol = 13,
    InvalidMemcpyDirection = 21,
    InvalidDevice = 101,
    InvalidResourceHandle = 400,
    IllegalState = 401,
    NotReady = 600,
    LaunchFailure = 719,
    StreamCaptureUnsupported = 900,
    StreamCaptureInvalidated = 901,
    StreamCaptureUnjoined = 904,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 13] = [
        ErrorCode::Success,
        ErrorCode::InvalidValue,
        ErrorCode::OutOfMemory,
        ErrorCode::InvalidSymbol,
        ErrorCode::InvalidMemcpyDirection,
        ErrorCode::InvalidDevice,
        ErrorCode::InvalidResourceHandle,
        ErrorCode::IllegalState,
        ErrorCode::NotReady,
        ErrorCode::LaunchFailure,
        ErrorCode::StreamCaptureUnsupported,
        ErrorCode::StreamCaptureInvalidated,
        ErrorCode::StreamCaptureUnjoined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "no error",
            ErrorCode::InvalidValue => "invalid argument",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::InvalidSymbol => "invalid device symbol",
            ErrorCode::InvalidMemcpyDirection => "invalid copy direction for memcpy",
            ErrorCode::InvalidDevice => "invalid device ordinal",
            ErrorCode::InvalidResourceHandle => "invalid resource handle",
            ErrorCode::IllegalState => "operation not permitted in the current state",
            ErrorCode::NotReady => "device not ready",
            ErrorCode::LaunchFailure => "unspecified launch failure",
            ErrorCode::StreamCaptureUnsupported => "operation not permitted when stream is capturing",
            ErrorCode::StreamCaptureInvalidated => "operation failed due to a previous error during capture",
            ErrorCode::StreamCaptureUnjoined => "capture did not join all forked streams",
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_raw() == raw)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by the runtime: a status code plus an optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.code, .detail))]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub detail: Option<String>,
}

fn render(code: &ErrorCode, detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!("{} ({detail})", code.as_str()),
        None => code.as_str().to_string(),
    }
}

impl RuntimeError {
    pub fn new(code: ErrorCode, detail: impl Into<Option<String>>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidValue, detail.into())
    }

    pub fn out_of_memory(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::OutOfMemory, detail.into())
    }

    pub fn invalid_symbol(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSymbol, detail.into())
    }

    pub fn invalid_direction(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidMemcpyDirection, detail.into())
    }

    pub fn invalid_device(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDevice, detail.into())
    }

    pub fn invalid_handle(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidResourceHandle, detail.into())
    }

    pub fn illegal_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalState, detail.into())
    }

    pub fn not_ready() -> Self {
        Self::new(ErrorCode::NotReady, None)
    }

    pub fn launch_failure(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::LaunchFailure, detail.into())
    }

    pub fn capture_unsupported(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamCaptureUnsupported, detail.into())
    }

    pub fn capture_invalidated(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamCaptureInvalidated, detail.into())
    }

    pub fn capture_unjoined(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamCaptureUnjoined, detail.into())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::illegal_state(format!("{what} mutex poisoned"))
    }
}

/// Convenience alias for results returned by runtime routines.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_raw(code.as_raw()), Some(code));
        }
        assert_eq!(ErrorCode::from_raw(-7), None);
        assert_eq!(ErrorCode::InvalidMemcpyDirection.as_raw(), 21);
    }

    #[test]
    fn display_includes_detail() {
        let err = RuntimeError::invalid_value("count is zero");
        assert_eq!(err.to_string(), "invalid argument (count is zero)");
        let err = RuntimeError::not_ready();
        assert_eq!(err.to_string(), "device not ready");
    }
}
