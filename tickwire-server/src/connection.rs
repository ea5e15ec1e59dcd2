//! The single accepted client connection.
//!
//! Wraps the socket together with its receive decoder, send buffer and
//! session. Reads and writes come in two flavours: non-blocking ones used by
//! the per-tick reactor, and blocking ones used while holding.

use crate::error::{DispatchError, ServerError};
use crate::server::ShutdownHandle;
use crate::session::Session;
use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tickwire_protocol::{Decoder, Encoder, Response};

/// Outcome of one non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the decoder.
    Data(usize),
    /// Nothing to read right now.
    Idle,
}

pub struct Connection {
    stream: TcpStream,
    pub session: Session,
    decoder: Decoder,
    send_buf: BytesMut,
}

impl Connection {
    /// Takes ownership of a freshly accepted stream and switches it to
    /// non-blocking mode with Nagle disabled.
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        max_frame_size: u32,
    ) -> Result<Self, ServerError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            session: Session::new(remote_addr),
            decoder: Decoder::new().with_max_payload(max_frame_size),
            send_buf: BytesMut::with_capacity(8192),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.session.remote_addr
    }

    /// One non-blocking read of at most `buf.len()` bytes.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ServerError> {
        match self.stream.read(buf) {
            Ok(0) => Err(ServerError::ConnectionClosed),
            Ok(n) => {
                self.decoder.extend(&buf[..n]);
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if is_transient(&e) => Ok(ReadOutcome::Idle),
            Err(e) => Err(e.into()),
        }
    }

    /// Takes the next complete frame payload off the receive buffer.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ServerError> {
        Ok(self.decoder.decode_frame()?)
    }

    /// Appends a framed response to the send buffer.
    pub fn queue_response(&mut self, response: &Response) {
        if let Err(e) = Encoder::encode_response_into(response, &mut self.send_buf) {
            tracing::error!("[{}] Failed to encode response: {}", self.remote_addr(), e);
            let fallback = Response::error(
                response.id,
                DispatchError::Encode(e.to_string()).traceback(),
            );
            // A string-only error response always encodes.
            if let Err(e) = Encoder::encode_response_into(&fallback, &mut self.send_buf) {
                tracing::error!("[{}] Failed to encode fallback: {}", self.remote_addr(), e);
            }
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.send_buf.is_empty()
    }

    pub fn pending_output(&self) -> usize {
        self.send_buf.len()
    }

    /// One non-blocking write of pending bytes. Only what was written is
    /// removed from the send buffer.
    pub fn try_flush(&mut self) -> Result<usize, ServerError> {
        if self.send_buf.is_empty() {
            return Ok(0);
        }
        match self.stream.write(&self.send_buf) {
            Ok(0) => Err(ServerError::ConnectionClosed),
            Ok(n) => {
                self.send_buf.advance(n);
                Ok(n)
            }
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes every pending byte. The stream must be in blocking mode.
    pub fn flush_blocking(&mut self) -> Result<(), ServerError> {
        if self.send_buf.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.send_buf)?;
        self.stream.flush()?;
        self.send_buf.clear();
        Ok(())
    }

    /// Switches to blocking mode with a per-read timeout.
    pub fn set_blocking(&mut self, read_timeout: Duration) -> Result<(), ServerError> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(read_timeout))?;
        Ok(())
    }

    pub fn set_nonblocking(&mut self) -> Result<(), ServerError> {
        self.stream.set_read_timeout(None)?;
        self.stream.set_nonblocking(true)?;
        Ok(())
    }

    /// Blocks until one complete frame is available.
    ///
    /// Frames already sitting in the receive buffer are returned first. Each
    /// read timeout checks `shutdown` before trying again.
    pub fn read_frame_blocking(
        &mut self,
        buf: &mut [u8],
        shutdown: &ShutdownHandle,
    ) -> Result<Bytes, ServerError> {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(frame);
            }
            match self.stream.read(buf) {
                Ok(0) => return Err(ServerError::ConnectionClosed),
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) if is_timeout(&e) => {
                    if shutdown.is_shutdown() {
                        return Err(ServerError::ShuttingDown);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Shuts the socket down. Buffered data in both directions is dropped.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// A read timeout surfaces as WouldBlock on Unix and TimedOut on Windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
