//! # tickwire-client
//!
//! Client library for tickwire.
//!
//! This crate provides:
//! - A blocking client that sends one request at a time and waits for its
//!   response
//! - Hold scopes that keep the server serving until they are released

pub mod client;
pub mod connection;
pub mod error;

pub use client::{Client, HoldGuard};
pub use connection::{ClientConfig, Connection};
pub use error::ClientError;
