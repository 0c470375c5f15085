//! # Crosswire Matrix
//!
//! Drives the cross-product of client runtime × server runtime × crypto
//! configuration × scenario. Each cell gets an isolated working directory
//! and an ephemeral endpoint, a freshly spawned server process, and a
//! sequence of KV probe scenarios over a newly established channel. The
//! compatibility validator is consulted before any process is spawned so
//! known-broken pairings fail fast with an actionable reason.

pub mod compat;
pub mod error;
pub mod report;
pub mod runner;
pub mod scenario;

pub use compat::*;
pub use error::*;
pub use report::*;
pub use runner::*;
pub use scenario::*;
