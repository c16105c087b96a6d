//! API error type carrying the machine-readable status code

use thiserror::Error;

use crate::types::StatusCode;

/// Errors crossing the HTTP boundary
#[derive(Debug, Error)]
pub enum ApiError {
    /// The gateway answered with a non-Success status code
    #[error("{message} (code {code:?})")]
    Status { code: StatusCode, message: String },

    /// Request could not be delivered or the response was not 2xx
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body was not a valid envelope
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Status code carried by this error, `ServerInternal` for
    /// transport-level failures.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Status { code, .. } => *code,
            Self::Transport(_) | Self::InvalidResponse(_) => StatusCode::ServerInternal,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
