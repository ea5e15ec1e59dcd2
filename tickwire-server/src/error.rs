//! Server error types.

use crate::config::ConfigError;
use tickwire_protocol::{ErrorCode, ProtocolError, RequestParseError};
use thiserror::Error;

/// Transport and setup errors.
///
/// None of these are ever answered on the wire: when one occurs on a live
/// connection the server resets it and goes back to listening.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection closed locally")]
    Disconnected,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Per-request failures, converted into `error` responses at the dispatch
/// boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Malformed(#[from] RequestParseError),

    #[error("function not allowed or not found: {0}")]
    NotFound(String),

    #[error("{name} failed: {message}")]
    Invocation { name: String, message: String },

    #[error("{name} panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("failed to encode response: {0}")]
    Encode(String),
}

impl DispatchError {
    /// Converts to protocol error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::Malformed(e) => e.code,
            DispatchError::NotFound(_) => ErrorCode::NotFound,
            DispatchError::Invocation { .. } => ErrorCode::InvocationFailure,
            DispatchError::Panicked { .. } => ErrorCode::InvocationFailure,
            DispatchError::Encode(_) => ErrorCode::InternalError,
        }
    }

    /// Renders the `traceback` text sent back to the caller.
    pub fn traceback(&self) -> String {
        match self {
            // Already rendered as "<CODE>: <detail>".
            DispatchError::Malformed(e) => e.to_string(),
            other => other.error_code().traceback(other),
        }
    }
}
