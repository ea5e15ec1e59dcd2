//! High-level client API.

use crate::connection::{ClientConfig, Connection};
use crate::error::ClientError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use tickwire_protocol::{ControlCommand, ErrorCode, Request, RequestBody, Response};

/// Blocking client for a tickwire server.
///
/// Requests are strictly sequential: each call writes one request and waits
/// for its response before returning.
pub struct Client {
    config: ClientConfig,
    conn: Option<Connection>,
    next_id: u64,
    holding: bool,
}

impl Client {
    /// Creates a new client with the given configuration. Nothing is
    /// connected until the first call or [`Client::connect`].
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: None,
            next_id: 1,
            holding: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects to the server. Does nothing if already connected.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.config)?;
            tracing::info!("Connected to {}", conn.peer_addr());
            self.conn = Some(conn);
        }
        Ok(())
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns whether a hold scope is active.
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// The id the next request will carry.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Closes the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Closing connection to {}", conn.peer_addr());
            conn.close();
        }
        self.holding = false;
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Calls a host function and returns its result value.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.request(RequestBody::Call {
            name: name.to_string(),
            args,
        })
    }

    /// Calls a host function and deserializes its result.
    pub fn call_as<T: DeserializeOwned>(
        &mut self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<T, ClientError> {
        let value = self.call(name, args)?;
        Ok(serde_json::from_value(value)?)
    }

    // =========================================================================
    // Hold scopes
    // =========================================================================

    /// Asks the server to keep serving this client without returning to its
    /// host until the returned guard is released or dropped.
    ///
    /// Hold scopes do not nest.
    pub fn hold(&mut self) -> Result<HoldGuard<'_>, ClientError> {
        if self.holding {
            return Err(ClientError::InvalidState(
                "hold() does not support nesting".to_string(),
            ));
        }
        self.request(RequestBody::Control {
            cmd: ControlCommand::Hold,
        })?;
        self.holding = true;
        Ok(HoldGuard { client: self })
    }

    /// Runs `f` inside a hold scope. RELEASE is sent whatever `f` returns.
    pub fn with_hold<T, F>(&mut self, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&mut Client) -> Result<T, ClientError>,
    {
        let mut guard = self.hold()?;
        let result = f(&mut *guard);
        let released = guard.release();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Ends the current hold scope, if any. The holding flag is cleared even
    /// if the RELEASE request fails.
    pub fn release(&mut self) -> Result<(), ClientError> {
        if !self.holding {
            return Ok(());
        }
        let result = self.request(RequestBody::Control {
            cmd: ControlCommand::Release,
        });
        self.holding = false;
        result.map(|_| ())
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn request(&mut self, body: RequestBody) -> Result<Value, ClientError> {
        self.connect()?;

        let id = self.next_id;
        self.next_id += 1;
        let request = Request { id, body };

        let response = match self.roundtrip(&request) {
            Ok(response) => response,
            Err(e) => {
                if e.poisons_connection() {
                    tracing::warn!("Request #{} failed, closing connection: {}", id, e);
                    self.close();
                }
                return Err(e);
            }
        };

        if response.id != Some(id) {
            return Err(ClientError::ProtocolMismatch {
                expected: id,
                got: response.id,
            });
        }

        response.into_result().map_err(|traceback| ClientError::Remote {
            code: ErrorCode::from_traceback(&traceback),
            traceback,
        })
    }

    fn roundtrip(&mut self, request: &Request) -> Result<Response, ClientError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ClientError::ConnectionLost("not connected".to_string()))?;
        conn.send(request)?;
        conn.receive()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// An active hold scope.
///
/// Derefs to the [`Client`], so calls are made through the guard as usual.
/// Dropping the guard sends RELEASE.
pub struct HoldGuard<'a> {
    client: &'a mut Client,
}

impl HoldGuard<'_> {
    /// Ends the scope and reports whether RELEASE succeeded.
    pub fn release(self) -> Result<(), ClientError> {
        // Drop becomes a no-op once the flag is cleared.
        self.client.release()
    }
}

impl Deref for HoldGuard<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        &*self.client
    }
}

impl DerefMut for HoldGuard<'_> {
    fn deref_mut(&mut self) -> &mut Client {
        &mut *self.client
    }
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.client.release() {
            tracing::warn!("Failed to release hold: {}", e);
        }
    }
}
