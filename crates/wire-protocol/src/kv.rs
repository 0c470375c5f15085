//! The KV probe RPC service.
//!
//! The minimal Get/Put/Delete/List service that serves as the functional
//! payload for conformance checks. Keys are restricted to `[A-Za-z0-9._-]+`
//! so a filesystem-backed store can use them as file names directly.

use serde::{Deserialize, Serialize};

/// Characters permitted in KV keys.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Validate a key, producing the wire error on violation.
pub fn validate_key(key: &str) -> KvResult<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(KvError::InvalidKey {
            key: key.to_string(),
        })
    }
}

/// Name of the metadata field enrichment attaches to structured payloads.
pub const METADATA_FIELD: &str = "_probe_metadata";

/// KV probe service definition.
#[tarpc::service]
pub trait KvService {
    /// Check that the service is alive and report basic stats.
    async fn health_check() -> KvResult<KvHealth>;

    /// Store a value under a key. Last write wins.
    async fn put(key: String, value: Vec<u8>) -> KvResult<()>;

    /// Fetch the value stored under a key, or `None` if absent.
    async fn get(key: String) -> KvResult<Option<Vec<u8>>>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(key: String) -> KvResult<()>;

    /// List every stored key.
    async fn list() -> KvResult<Vec<String>>;
}

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Health status of the KV probe service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvHealth {
    pub status: String,
    pub entries: u64,
    pub enrichment_enabled: bool,
}

/// Wire errors for KV operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KvError {
    #[error("invalid key {key:?}: keys must match [A-Za-z0-9._-]+")]
    InvalidKey { key: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Metadata attached to structured payloads when enrichment is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Address of the peer that issued the Put.
    pub peer_endpoint: String,
    /// KV protocol version the entry was written under.
    pub protocol_version: u32,
    /// Unix timestamp (seconds) of the write.
    pub stored_at: u64,
    /// TLS mode of the channel the write arrived on.
    pub tls_mode: String,
    /// Crypto config id, when TLS was active.
    pub crypto_config: Option<String>,
    /// Hex SHA-256 fingerprint of the serving certificate, when TLS was active.
    pub cert_fingerprint: Option<String>,
}
