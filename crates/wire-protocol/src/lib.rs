//! # Crosswire Wire Protocol
//!
//! Core protocol definitions shared by every crosswire component: the
//! single-line startup handshake a plugin server prints on stdout, the
//! crypto configurations used for TLS key generation, the KV probe RPC
//! service, and the postcard framing used for tarpc transports.
//!
//! ## Startup handshake
//!
//! A freshly launched server announces itself with exactly one line on
//! standard output:
//!
//! ```text
//! <core_version>|<protocol_version>|<network>|<address>|<protocol>|<cert_b64>
//! ```
//!
//! Anything that does not split into exactly six pipe-delimited fields is
//! ordinary log output and must be skipped by the reader:
//!
//! ```rust
//! use crosswire_wire_protocol::HandshakeLine;
//!
//! let line = "1|1|tcp|127.0.0.1:4433|tarpc-postcard|";
//! let handshake = HandshakeLine::parse(line).expect("valid handshake");
//! assert_eq!(handshake.endpoint().address, "127.0.0.1:4433");
//! assert!(HandshakeLine::parse("some log output").is_none());
//! ```
//!
//! ## KV probe service
//!
//! [`KvService`] is the minimal Get/Put/Delete/List service used as the
//! functional payload for conformance checks. It is defined with
//! `#[tarpc::service]` and carried over a length-delimited, postcard-encoded
//! transport ([`PostcardFormat`]).

pub mod crypto_config;
pub mod handshake;
pub mod kv;
pub mod transport;
pub mod version;

pub use crypto_config::*;
pub use handshake::*;
pub use kv::*;
pub use transport::*;
pub use version::*;
