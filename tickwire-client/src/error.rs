//! Client error types.

use tickwire_protocol::ErrorCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failure while establishing the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] tickwire_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("request timeout")]
    Timeout,

    #[error("response id mismatch: expected {expected}, got {got:?}")]
    ProtocolMismatch { expected: u64, got: Option<u64> },

    /// The server answered with an error response.
    #[error("remote error: {traceback}")]
    Remote {
        code: Option<ErrorCode>,
        traceback: String,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns whether the connection is gone and a retry would need to
    /// reconnect.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::ConnectionLost(_) | ClientError::Timeout
        )
    }

    /// Returns the remote error code, if this is a remote error.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Remote { code, .. } => *code,
            _ => None,
        }
    }

    /// Errors after which the byte stream can no longer be trusted.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionLost(_) | ClientError::Timeout | ClientError::Protocol(_)
        )
    }
}
