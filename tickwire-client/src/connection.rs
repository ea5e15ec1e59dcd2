//! Connection management.

use crate::error::ClientError;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tickwire_protocol::{Decoder, Encoder, Request, Response, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT};

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout while waiting for a response. `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Some(Duration::from_secs(2)),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), ClientError> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        // Zero durations are rejected by the socket API.
        if self.connect_timeout.is_zero() {
            return Err(ClientError::Config(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ClientError::Config(
                "read_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// An open connection to a tickwire server.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    decoder: Decoder,
    read_buf: Vec<u8>,
}

impl Connection {
    /// Resolves the configured host and connects to the first address that
    /// accepts.
    pub fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut last_err = None;
        for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(config.read_timeout)?;
                    tracing::debug!("Connected to {}", addr);
                    return Ok(Self {
                        stream,
                        peer_addr: addr,
                        decoder: Decoder::new().with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE),
                        read_buf: vec![0u8; DEFAULT_READ_BUFFER_SIZE],
                    });
                }
                Err(e) => {
                    tracing::debug!("Failed to connect to {}: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ClientError::Io(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {}:{}", config.host, config.port),
            )
        })))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Writes one framed request.
    pub fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let frame = Encoder::encode_request(request)?;
        self.stream
            .write_all(&frame)
            .map_err(|e| ClientError::ConnectionLost(e.to_string()))?;
        tracing::debug!("Sent #{} {}", request.id, request.describe());
        Ok(())
    }

    /// Blocks until one complete response has arrived.
    pub fn receive(&mut self) -> Result<Response, ClientError> {
        loop {
            if let Some(response) = self.decoder.decode_response()? {
                return Ok(response);
            }
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    return Err(ClientError::ConnectionLost(
                        "connection closed by server".to_string(),
                    ))
                }
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(ClientError::Timeout)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ClientError::ConnectionLost(e.to_string())),
            }
        }
    }

    /// Shuts the socket down.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
