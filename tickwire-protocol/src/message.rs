//! JSON message types for requests and responses.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Control commands that switch the server in and out of hold mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    Hold,
    Release,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Hold => "HOLD",
            ControlCommand::Release => "RELEASE",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, strictly increasing per connection on the issuing side.
    pub id: u64,

    #[serde(flatten)]
    pub body: RequestBody,
}

/// Request payload, discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestBody {
    /// Invoke a registered host function with positional arguments.
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Switch hold mode on or off.
    Control { cmd: ControlCommand },
}

impl Request {
    pub fn call(id: u64, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            body: RequestBody::Call {
                name: name.into(),
                args,
            },
        }
    }

    pub fn control(id: u64, cmd: ControlCommand) -> Self {
        Self {
            id,
            body: RequestBody::Control { cmd },
        }
    }

    /// Short label for logging.
    pub fn describe(&self) -> String {
        match &self.body {
            RequestBody::Call { name, args } => format!("call {}/{}", name, args.len()),
            RequestBody::Control { cmd } => format!("control {}", cmd),
        }
    }

    /// Parses a request payload field by field.
    ///
    /// Unlike plain deserialization this recovers the `id` before anything
    /// else is validated, so a request with a bad `type`, `cmd` or `args` can
    /// still be answered with its own id. The id is `None` only when the
    /// payload is not a JSON object or carries no usable id.
    pub fn parse(payload: &[u8]) -> Result<Self, RequestParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| {
            RequestParseError::new(None, ErrorCode::FramingError, "payload is not valid UTF-8")
        })?;
        let value: Value = serde_json::from_str(text).map_err(|e| {
            RequestParseError::new(None, ErrorCode::FramingError, format!("invalid JSON: {}", e))
        })?;
        let Value::Object(obj) = value else {
            return Err(RequestParseError::new(
                None,
                ErrorCode::FramingError,
                "request must be an object",
            ));
        };

        let id = obj.get("id").and_then(Value::as_u64).ok_or_else(|| {
            RequestParseError::new(
                None,
                ErrorCode::InvalidArgs,
                "request id must be a non-negative integer",
            )
        })?;

        let body = match obj.get("type").and_then(Value::as_str) {
            Some("call") => parse_call(id, &obj)?,
            Some("control") => parse_control(id, &obj)?,
            _ => {
                let shown = obj.get("type").cloned().unwrap_or(Value::Null);
                return Err(RequestParseError::new(
                    Some(id),
                    ErrorCode::UnsupportedType,
                    format!("unsupported request type: {}", shown),
                ));
            }
        };

        Ok(Self { id, body })
    }
}

fn parse_call(id: u64, obj: &Map<String, Value>) -> Result<RequestBody, RequestParseError> {
    // Without a usable name there is no function to find.
    let name = obj.get("name").and_then(Value::as_str).ok_or_else(|| {
        let shown = obj.get("name").cloned().unwrap_or(Value::Null);
        RequestParseError::new(
            Some(id),
            ErrorCode::NotFound,
            format!("function not allowed or not found: {}", shown),
        )
    })?;
    let args = match obj.get("args") {
        None => Vec::new(),
        Some(Value::Array(args)) => args.clone(),
        Some(_) => {
            return Err(RequestParseError::new(
                Some(id),
                ErrorCode::InvalidArgs,
                "args must be a list",
            ))
        }
    };
    Ok(RequestBody::Call {
        name: name.to_string(),
        args,
    })
}

fn parse_control(id: u64, obj: &Map<String, Value>) -> Result<RequestBody, RequestParseError> {
    let cmd = match obj.get("cmd").and_then(Value::as_str) {
        Some("HOLD") => ControlCommand::Hold,
        Some("RELEASE") => ControlCommand::Release,
        _ => {
            let shown = obj.get("cmd").cloned().unwrap_or(Value::Null);
            return Err(RequestParseError::new(
                Some(id),
                ErrorCode::UnknownCommand,
                format!("unknown control cmd: {}", shown),
            ));
        }
    };
    Ok(RequestBody::Control { cmd })
}

/// A request payload that could not be turned into a [`Request`].
#[derive(Debug, Clone, Error)]
#[error("{code}: {detail}")]
pub struct RequestParseError {
    /// Id of the offending request, when it could be read.
    pub id: Option<u64>,
    pub code: ErrorCode,
    pub detail: String,
}

impl RequestParseError {
    pub fn new(id: Option<u64>, code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            id,
            code,
            detail: detail.into(),
        }
    }
}

/// Response message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this response answers; `null` on the wire when the
    /// request could not be parsed far enough to read one.
    pub id: Option<u64>,

    #[serde(flatten)]
    pub body: ResponseBody,
}

/// Response payload, discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseBody {
    Result {
        #[serde(default)]
        value: Value,
    },
    Error {
        traceback: String,
    },
}

impl Response {
    pub fn result(id: Option<u64>, value: Value) -> Self {
        Self {
            id,
            body: ResponseBody::Result { value },
        }
    }

    pub fn error(id: Option<u64>, traceback: impl Into<String>) -> Self {
        Self {
            id,
            body: ResponseBody::Error {
                traceback: traceback.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.body, ResponseBody::Result { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error { .. })
    }

    /// Splits the response into its value or its traceback.
    pub fn into_result(self) -> Result<Value, String> {
        match self.body {
            ResponseBody::Result { value } => Ok(value),
            ResponseBody::Error { traceback } => Err(traceback),
        }
    }
}
