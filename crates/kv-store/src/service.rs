//! KV probe service implementation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crosswire_wire_protocol::{
    validate_key, EntryMetadata, KvError, KvHealth, KvResult, KvService, TlsMode,
    KV_PROTOCOL_VERSION,
};

use crate::enrichment::{enrich, Payload};
use crate::storage::FsKvStorage;

/// Channel facts recorded into entry metadata on enriched writes.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    /// Address of the connected peer.
    pub peer_endpoint: String,
    pub tls_mode: TlsMode,
    pub crypto_config: Option<String>,
    /// Hex SHA-256 fingerprint of the serving certificate.
    pub cert_fingerprint: Option<String>,
}

impl ConnectionMeta {
    /// Metadata for a plaintext channel with an unknown peer, used by local
    /// (non-networked) service instances.
    pub fn local() -> Self {
        Self {
            peer_endpoint: "local".to_string(),
            tls_mode: TlsMode::Disabled,
            crypto_config: None,
            cert_fingerprint: None,
        }
    }
}

/// Implementation of [`KvService`] over filesystem storage.
#[derive(Clone)]
pub struct KvServiceImpl {
    storage: Arc<FsKvStorage>,
    enrichment_enabled: bool,
    meta: ConnectionMeta,
}

impl KvServiceImpl {
    pub fn new(storage: Arc<FsKvStorage>, enrichment_enabled: bool, meta: ConnectionMeta) -> Self {
        Self {
            storage,
            enrichment_enabled,
            meta,
        }
    }

    fn entry_metadata(&self) -> EntryMetadata {
        let stored_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        EntryMetadata {
            peer_endpoint: self.meta.peer_endpoint.clone(),
            protocol_version: KV_PROTOCOL_VERSION,
            stored_at,
            tls_mode: self.meta.tls_mode.to_string(),
            crypto_config: self.meta.crypto_config.clone(),
            cert_fingerprint: self.meta.cert_fingerprint.clone(),
        }
    }
}

impl KvService for KvServiceImpl {
    async fn health_check(self, _context: tarpc::context::Context) -> KvResult<KvHealth> {
        let entries = self.storage.len().await.map_err(KvError::from)?;
        Ok(KvHealth {
            status: "healthy".to_string(),
            entries,
            enrichment_enabled: self.enrichment_enabled,
        })
    }

    async fn put(
        self,
        _context: tarpc::context::Context,
        key: String,
        value: Vec<u8>,
    ) -> KvResult<()> {
        validate_key(&key)?;

        let stored = if self.enrichment_enabled {
            let payload = Payload::classify(&value);
            if payload.is_structured() {
                info!(key, "enriching structured payload");
            }
            enrich(payload, &self.entry_metadata())
        } else {
            value
        };

        self.storage.put(&key, &stored).await.map_err(KvError::from)
    }

    async fn get(self, _context: tarpc::context::Context, key: String) -> KvResult<Option<Vec<u8>>> {
        self.storage.get(&key).await.map_err(KvError::from)
    }

    async fn delete(self, _context: tarpc::context::Context, key: String) -> KvResult<()> {
        validate_key(&key)?;
        self.storage.delete(&key).await.map_err(|e| {
            warn!(key, error = %e, "delete failed");
            KvError::from(e)
        })
    }

    async fn list(self, _context: tarpc::context::Context) -> KvResult<Vec<String>> {
        self.storage.list().await.map_err(KvError::from)
    }
}
