//! # Crosswire Server
//!
//! The server half of the plugin handshake: validates the shared-secret
//! cookie, binds a tcp or local-socket listener, prints the single startup
//! handshake line, and serves the KV probe service over a plaintext or
//! (mutually) authenticated TLS channel.

pub mod cookie;
pub mod error;
pub mod server;
pub mod tls;

pub use cookie::*;
pub use error::*;
pub use server::*;
pub use tls::*;
