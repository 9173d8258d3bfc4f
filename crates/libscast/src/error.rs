use scast_protocol::ErrorCode;
use thiserror::Error;

/// Failures resolved by the coordinator. Every asynchronous outcome is
/// folded into one of these before it reaches a caller or observer;
/// nothing leaves the state machine unresolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    #[error("screen capture permission denied")]
    PermissionDenied,

    #[error("display server failed to start: {0}")]
    StartFailed(String),

    #[error("busy: {0}")]
    Busy(&'static str),

    #[error("start request canceled by a stop command")]
    Canceled,

    #[error("coordinator unavailable")]
    Unavailable,
}

impl CastError {
    /// Convert to protocol error code and message.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            CastError::PermissionDenied => (ErrorCode::PermissionDenied, self.to_string()),
            CastError::StartFailed(_) => (ErrorCode::StartFailed, self.to_string()),
            CastError::Busy(_) => (ErrorCode::Busy, self.to_string()),
            CastError::Canceled => (ErrorCode::Busy, self.to_string()),
            CastError::Unavailable => (ErrorCode::ServerError, self.to_string()),
        }
    }
}
