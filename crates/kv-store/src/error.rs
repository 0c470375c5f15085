use thiserror::Error;

use crosswire_wire_protocol::KvError;

/// Error type for KV storage operations.
#[derive(Debug, Error)]
pub enum KvStoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<KvStoreError> for KvError {
    fn from(err: KvStoreError) -> Self {
        match err {
            KvStoreError::InvalidKey(key) => KvError::InvalidKey { key },
            KvStoreError::Storage(message) => KvError::Storage { message },
            KvStoreError::Io(e) => KvError::Storage {
                message: e.to_string(),
            },
        }
    }
}
