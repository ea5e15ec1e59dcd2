//! # tickwire-protocol
//!
//! Wire protocol implementation for tickwire.
//!
//! This crate provides:
//! - Length-prefixed framing (`u32` little-endian length + payload)
//! - JSON request/response envelopes with correlation ids
//! - Incremental decoding for non-blocking readers
//! - Stable error codes carried in error responses

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, LENGTH_PREFIX_SIZE};
pub use message::{
    ControlCommand, Request, RequestBody, RequestParseError, Response, ResponseBody,
};

/// Default TCP port the host listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Default frame payload limit imposed by receivers (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
