//! # Crosswire Certificate Authority
//!
//! Issues ephemeral CA + leaf certificate bundles for the conformance
//! harness. One [`CertificateBundle`] per crypto configuration: a self-signed
//! CA plus a server leaf (SAN `localhost` / `127.0.0.1`) and a client leaf,
//! both chained to that CA so mutual authentication succeeds between any two
//! peers holding the same bundle.
//!
//! Bundles are cached per config id inside a [`CaSession`] with single-flight
//! issuance: concurrent callers for the same id share one result, distinct
//! ids issue independently.
//!
//! **These bundles exist for one conformance session only.** Private key
//! material is held in memory, reused across every test cell of the session,
//! and dropped with the session. Nothing here is suitable for production
//! secret storage, rotation, or revocation.

pub mod error;
pub mod export;
pub mod issuer;
pub mod session;

pub use error::*;
pub use export::*;
pub use issuer::*;
pub use session::*;
