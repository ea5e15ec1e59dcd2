//! # tickwire-server
//!
//! Tick-driven TCP server for tickwire.
//!
//! This crate provides:
//! - A single-client reactor advanced one bounded step per host tick
//! - Hold mode, which serves a burst of requests without yielding
//! - Request dispatch onto an embedder-supplied function registry
//! - YAML and environment configuration

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, ExtraPeerPolicy, HostConfig, NetworkConfig};
pub use error::{DispatchError, ServerError};
pub use handler::{CommandHandler, Handled};
pub use registry::{arg_as, FunctionRegistry, Invocable, InvocationError, Registry};
pub use server::{Server, ServerConfig, ServerState, ServerStats, ShutdownHandle};
pub use session::{Session, SessionState};
