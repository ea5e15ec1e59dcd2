//! Length-prefixed frame format.
//!
//! Frame layout:
//!
//! ```text
//! +----------------+---------------------------+
//! | payload_len    | payload                   |
//! | u32 LE, 4 bytes| payload_len bytes (UTF-8) |
//! +----------------+---------------------------+
//! ```
//!
//! The length counts payload bytes only. A receiver never looks at the
//! payload until all of it has arrived.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Stateless frame encoder/decoder.
///
/// All decoding state lives in the caller's buffer, so decoding can be
/// retried after every partial read.
pub struct Frame;

impl Frame {
    /// Encodes a payload into a length-prefixed frame.
    pub fn encode(payload: &[u8]) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        Self::encode_into(payload, &mut buf)?;
        Ok(buf)
    }

    /// Appends a length-prefixed frame to an existing buffer.
    pub fn encode_into(payload: &[u8], buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            size: payload.len() as u64,
            max: u32::MAX as u64,
        })?;
        buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
        buf.put_u32_le(len);
        buf.put_slice(payload);
        Ok(())
    }

    /// Returns the declared payload length if the prefix has arrived.
    pub fn peek_len(buf: &[u8]) -> Option<u32> {
        let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
        Some(u32::from_le_bytes(prefix))
    }

    /// Extracts the next complete payload from the buffer.
    ///
    /// Returns `None`, leaving the buffer untouched, until the prefix and the
    /// whole declared payload are present. On success exactly
    /// `4 + payload_len` bytes are consumed.
    pub fn decode(buf: &mut BytesMut) -> Option<Bytes> {
        let payload_len = Self::peek_len(buf)? as usize;
        if buf.len() < LENGTH_PREFIX_SIZE + payload_len {
            return None;
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        Some(buf.split_to(payload_len).freeze())
    }
}
