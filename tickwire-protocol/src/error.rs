//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,
}

/// Stable error codes carried at the start of an error response traceback.
///
/// An error traceback is always rendered as `"<CODE>: <detail>"`, which lets
/// callers recover the code without a dedicated wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Payload was not UTF-8 JSON or the length prefix was unusable.
    FramingError,
    /// The request `type` is missing or unrecognized.
    UnsupportedType,
    /// A control request named an unknown `cmd`.
    UnknownCommand,
    /// The request envelope is recognized but its fields are malformed.
    InvalidArgs,
    /// The called function is not registered.
    NotFound,
    /// The registered function failed.
    InvocationFailure,
    InternalError,
}

impl ErrorCode {
    const ALL: [ErrorCode; 7] = [
        ErrorCode::FramingError,
        ErrorCode::UnsupportedType,
        ErrorCode::UnknownCommand,
        ErrorCode::InvalidArgs,
        ErrorCode::NotFound,
        ErrorCode::InvocationFailure,
        ErrorCode::InternalError,
    ];

    /// Returns the wire spelling of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FramingError => "FRAMING_ERROR",
            ErrorCode::UnsupportedType => "UNSUPPORTED_TYPE",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvocationFailure => "INVOCATION_FAILURE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Renders a traceback string for this code.
    pub fn traceback(&self, detail: impl fmt::Display) -> String {
        format!("{}: {}", self.as_str(), detail)
    }

    /// Recovers the code from a traceback produced by [`ErrorCode::traceback`].
    ///
    /// Returns `None` for tracebacks from peers that do not follow the
    /// `"<CODE>: "` convention.
    pub fn from_traceback(traceback: &str) -> Option<ErrorCode> {
        let (head, _) = traceback.split_once(':')?;
        Self::ALL.into_iter().find(|code| code.as_str() == head)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
