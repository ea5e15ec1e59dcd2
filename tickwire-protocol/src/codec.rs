//! Encoder and decoder for frames and messages.

use crate::error::ProtocolError;
use crate::frame::{Frame, LENGTH_PREFIX_SIZE};
use crate::message::{Request, Response};
use bytes::{Bytes, BytesMut};

/// Encodes requests and responses into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a frame.
    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        Self::encode_json(request)
    }

    /// Encodes a response into a frame.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        Self::encode_json(response)
    }

    /// Appends an encoded response to an outbound buffer.
    pub fn encode_response_into(
        response: &Response,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(response)?;
        Frame::encode_into(&payload, buf)
    }

    /// Encodes any JSON-serializable value into a frame.
    ///
    /// serde_json writes non-ASCII characters verbatim as UTF-8.
    pub fn encode_json<T: serde::Serialize>(value: &T) -> Result<BytesMut, ProtocolError> {
        let payload = serde_json::to_vec(value)?;
        Frame::encode(&payload)
    }
}

/// Incremental frame decoder over an owned receive buffer.
///
/// Bytes are appended as they arrive and complete frames are taken off the
/// front in arrival order. A partial frame stays buffered until the rest of
/// it is supplied.
pub struct Decoder {
    buffer: BytesMut,
    max_payload: Option<u32>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_payload: None,
        }
    }

    /// Rejects frames whose declared payload exceeds `max` bytes.
    pub fn with_max_payload(mut self, max: u32) -> Self {
        self.max_payload = Some(max);
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to take the next complete frame payload off the buffer.
    ///
    /// The size limit is checked as soon as the length prefix is visible, so
    /// an oversized frame is reported before its body is buffered.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if let (Some(max), Some(len)) = (self.max_payload, Frame::peek_len(&self.buffer)) {
            if len > max {
                return Err(ProtocolError::FrameTooLarge {
                    size: len as u64,
                    max: max as u64,
                });
            }
        }
        Ok(Frame::decode(&mut self.buffer))
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        match self.decode_frame()? {
            Some(payload) => {
                let text = std::str::from_utf8(&payload).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(Some(serde_json::from_str(text)?))
            }
            None => Ok(None),
        }
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.decode_frame()? {
            Some(payload) => {
                let text = std::str::from_utf8(&payload).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(Some(serde_json::from_str(text)?))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns whether a partial frame is sitting in the buffer.
    pub fn has_partial_frame(&self) -> bool {
        match Frame::peek_len(&self.buffer) {
            Some(len) => self.buffer.len() < LENGTH_PREFIX_SIZE + len as usize,
            None => !self.buffer.is_empty(),
        }
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
