//! Session management.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Requests are served one read per tick.
    Connected,
    /// The hold sub-loop owns the connection until RELEASE.
    Holding,
}

/// Per-connection bookkeeping for the single active client.
#[derive(Debug)]
pub struct Session {
    /// Remote address.
    pub remote_addr: SocketAddr,

    /// Session state.
    state: SessionState,

    /// Request counter.
    request_count: u64,

    /// Session creation time.
    created_at: Instant,
}

impl Session {
    /// Creates a new session.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            state: SessionState::Connected,
            request_count: 0,
            created_at: Instant::now(),
        }
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_holding(&self) -> bool {
        self.state == SessionState::Holding
    }

    /// Enters hold mode. Returns false if the session was already holding.
    pub fn begin_hold(&mut self) -> bool {
        if self.is_holding() {
            return false;
        }
        self.state = SessionState::Holding;
        true
    }

    /// Leaves hold mode. A no-op outside a hold.
    pub fn end_hold(&mut self) {
        self.state = SessionState::Connected;
    }

    pub fn record_request(&mut self) {
        self.request_count += 1;
    }

    /// Returns the request count.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Time since the client connected.
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}
