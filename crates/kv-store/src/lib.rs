//! # Crosswire KV Store
//!
//! The filesystem-backed implementation of the KV probe service. One record
//! per key under a configured storage root, last-write-wins, with optional
//! metadata enrichment for structured (JSON object) payloads.

use std::path::PathBuf;

pub mod enrichment;
pub mod error;
pub mod service;
pub mod storage;

pub use enrichment::*;
pub use error::*;
pub use service::*;
pub use storage::*;

/// Configuration for a KV store instance.
#[derive(Debug, Clone)]
pub struct KvStoreConfig {
    /// Directory holding one file per key.
    pub storage_root: PathBuf,
    /// Whether structured payloads get a metadata sibling attached on Put.
    pub enrichment_enabled: bool,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./crosswire-kv-data"),
            enrichment_enabled: true,
        }
    }
}
