//! # Crosswire Client
//!
//! The launching side of the plugin handshake: spawns a server process with
//! the shared-secret cookie in its environment, scans its stdout for the
//! startup handshake line, establishes a plaintext or mutually authenticated
//! TLS channel to the advertised endpoint, and drives the KV probe service
//! over it.

pub mod channel;
pub mod error;
pub mod kv_client;
pub mod process;

pub use channel::*;
pub use error::*;
pub use kv_client::*;
pub use process::*;
