//! Tick-driven TCP server.
//!
//! The server never spawns a thread and never blocks inside [`Server::tick`]
//! unless a client asked for it with a HOLD request. Each tick it accepts a
//! client if it has none, reads what is available, answers every complete
//! request and writes as much of the output as the socket takes.

use crate::config::{ConfigError, ExtraPeerPolicy};
use crate::connection::Connection;
use crate::error::ServerError;
use crate::handler::CommandHandler;
use crate::registry::FunctionRegistry;
use crate::session::SessionState;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickwire_protocol::{ErrorCode, ProtocolError, Response, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum bytes read from the socket per tick.
    pub read_chunk_size: usize,
    /// Per-read timeout while holding. Bounds how long a hold waits before
    /// checking for shutdown.
    pub hold_read_timeout: Duration,
    /// Largest frame payload accepted from the client.
    pub max_frame_size: u32,
    /// What to do with connection attempts while a client is connected.
    pub extra_peers: ExtraPeerPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            read_chunk_size: 4096,
            hold_read_timeout: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_PAYLOAD_SIZE,
            extra_peers: ExtraPeerPolicy::Queue,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_hold_read_timeout(mut self, timeout: Duration) -> Self {
        self.hold_read_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_extra_peers(mut self, policy: ExtraPeerPolicy) -> Self {
        self.extra_peers = policy;
        self
    }

    /// Rejects values the socket layer cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "read_chunk_size must be greater than 0".to_string(),
            ));
        }
        // `set_read_timeout` refuses a zero duration.
        if self.hold_read_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "hold_read_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub ticks: u64,
    pub connections_accepted: u64,
    pub requests_handled: u64,
    pub errors_returned: u64,
    pub holds_entered: u64,
    pub resets: u64,
    pub peers_refused: u64,
}

/// Cloneable flag asking the server to drop its client.
///
/// A hold sub-loop notices it at its next read timeout. Later ticks reset any
/// connection and stop accepting.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Connection state as seen from outside the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No client; waiting for one.
    Listening,
    Connected,
    /// The hold sub-loop is running. A hold always ends inside the tick that
    /// entered it, so callers of [`Server::state`] never see this between
    /// ticks.
    Holding,
}

/// Single-client TCP server driven by [`Server::tick`].
pub struct Server<R> {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: CommandHandler<R>,
    conn: Option<Connection>,
    read_buf: Vec<u8>,
    stats: ServerStats,
    shutdown: ShutdownHandle,
}

impl<R: FunctionRegistry> Server<R> {
    /// Binds the listening socket in non-blocking mode.
    pub fn bind(config: ServerConfig, registry: R) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        Ok(Self {
            read_buf: vec![0u8; config.read_chunk_size],
            config,
            listener,
            local_addr,
            handler: CommandHandler::new(registry),
            conn: None,
            stats: ServerStats::default(),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Runs one bounded, non-blocking step of the reactor.
    ///
    /// The only exception to "non-blocking" is a HOLD request, which keeps
    /// control until RELEASE or until the connection fails.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;

        if self.shutdown.is_shutdown() {
            if self.conn.is_some() {
                self.reset(ServerError::ShuttingDown);
            }
            return;
        }

        self.accept();
        self.poll_read();
        self.drain();
        self.flush();
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        match &self.conn {
            None => ServerState::Listening,
            Some(conn) => match conn.session.state() {
                SessionState::Connected => ServerState::Connected,
                SessionState::Holding => ServerState::Holding,
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_holding(&self) -> bool {
        self.state() == ServerState::Holding
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(Connection::remote_addr)
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Bytes queued for the client but not yet written to the socket.
    pub fn pending_output(&self) -> usize {
        self.conn.as_ref().map_or(0, Connection::pending_output)
    }

    pub fn registry(&self) -> &R {
        self.handler.registry()
    }

    pub fn registry_mut(&mut self) -> &mut R {
        self.handler.registry_mut()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Drops the current client, if any.
    pub fn disconnect(&mut self) {
        if self.conn.is_some() {
            self.reset(ServerError::Disconnected);
        }
    }

    fn accept(&mut self) {
        if self.conn.is_some() {
            if self.config.extra_peers == ExtraPeerPolicy::Refuse {
                self.refuse_waiting_peers();
            }
            return;
        }

        match self.listener.accept() {
            Ok((stream, addr)) => {
                match Connection::new(stream, addr, self.config.max_frame_size) {
                    Ok(conn) => {
                        tracing::info!("Client connected: {}", addr);
                        self.stats.connections_accepted += 1;
                        self.conn = Some(conn);
                    }
                    Err(e) => tracing::warn!("[{}] Failed to set up connection: {}", addr, e),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => tracing::error!("Accept error: {}", e),
        }
    }

    fn refuse_waiting_peers(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    tracing::warn!("Refusing {}: a client is already connected", addr);
                    let _ = stream.shutdown(Shutdown::Both);
                    self.stats.peers_refused += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                    return;
                }
            }
        }
    }

    fn poll_read(&mut self) {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.read_available(&mut self.read_buf),
            None => return,
        };
        if let Err(e) = result {
            self.reset(e);
        }
    }

    /// Answers every complete request in the receive buffer.
    fn drain(&mut self) {
        loop {
            let frame = match self.conn.as_mut() {
                Some(conn) => conn.next_frame(),
                None => return,
            };
            match frame {
                Ok(Some(payload)) => self.process(&payload),
                Ok(None) => return,
                Err(ServerError::Protocol(e)) => {
                    self.reject_frame(e);
                    return;
                }
                Err(e) => {
                    self.reset(e);
                    return;
                }
            }
        }
    }

    fn process(&mut self, payload: &[u8]) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let handled = self.handler.handle(&mut conn.session, payload);
        self.stats.requests_handled += 1;
        if handled.response.is_error() {
            self.stats.errors_returned += 1;
        }
        conn.queue_response(&handled.response);

        if handled.enter_hold {
            self.hold();
        }
    }

    fn hold(&mut self) {
        self.stats.holds_entered += 1;
        match self.run_hold() {
            Ok(()) => {}
            Err(ServerError::Protocol(e)) => self.reject_frame(e),
            Err(e) => self.reset(e),
        }
    }

    /// Serves requests synchronously until the client sends RELEASE.
    fn run_hold(&mut self) -> Result<(), ServerError> {
        let timeout = self.config.hold_read_timeout;
        let conn = self.conn.as_mut().ok_or(ServerError::ConnectionClosed)?;
        tracing::info!("[{}] Entering hold", conn.remote_addr());
        conn.set_blocking(timeout)?;
        // The HOLD acknowledgement must reach the client before we wait on it.
        conn.flush_blocking()?;

        loop {
            let conn = self.conn.as_mut().ok_or(ServerError::ConnectionClosed)?;
            if !conn.session.is_holding() {
                break;
            }
            let payload = conn.read_frame_blocking(&mut self.read_buf, &self.shutdown)?;
            self.process(&payload);
            self.conn
                .as_mut()
                .ok_or(ServerError::ConnectionClosed)?
                .flush_blocking()?;
        }

        let conn = self.conn.as_mut().ok_or(ServerError::ConnectionClosed)?;
        conn.set_nonblocking()?;
        tracing::info!("[{}] Hold released", conn.remote_addr());
        Ok(())
    }

    /// Answers an unrecoverable framing problem once, then drops the client.
    fn reject_frame(&mut self, error: ProtocolError) {
        if let Some(conn) = self.conn.as_mut() {
            let response = Response::error(None, ErrorCode::FramingError.traceback(&error));
            conn.queue_response(&response);
            self.stats.errors_returned += 1;
            let _ = conn.try_flush();
        }
        self.reset(ServerError::Protocol(error));
    }

    fn reset(&mut self, reason: ServerError) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let addr = conn.remote_addr();
        match reason {
            ServerError::ConnectionClosed | ServerError::Disconnected => {
                tracing::info!("Client disconnected: {} ({})", addr, reason);
            }
            _ => tracing::warn!("[{}] Resetting connection: {}", addr, reason),
        }
        tracing::debug!(
            "[{}] Session served {} requests in {:?}",
            addr,
            conn.session.request_count(),
            conn.session.duration()
        );
        if conn.buffered() > 0 {
            tracing::debug!("[{}] Discarding {} buffered bytes", addr, conn.buffered());
        }
        conn.close();
        self.stats.resets += 1;
    }

    fn flush(&mut self) {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.try_flush(),
            None => return,
        };
        if let Err(e) = result {
            self.reset(e);
        }
    }
}

impl<R> std::fmt::Debug for Server<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("peer", &self.conn.as_ref().map(Connection::remote_addr))
            .field("stats", &self.stats)
            .finish()
    }
}
