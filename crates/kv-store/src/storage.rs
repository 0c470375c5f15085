//! Filesystem-backed key/value storage.
//!
//! One file per key, named by the key itself. Keys are validated against the
//! wire charset before any path is built, so a hostile key can never escape
//! the storage root. Writes land in a temp file first and are renamed into
//! place, keeping read-after-write byte-identical even with concurrent
//! writers on the same key.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crosswire_wire_protocol::is_valid_key;

use crate::error::KvStoreError;

type Result<T> = std::result::Result<T, KvStoreError>;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key/value storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FsKvStorage {
    root: PathBuf,
}

impl FsKvStorage {
    /// Open (and create if needed) a storage root.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| KvStoreError::Storage(format!("creating storage root: {e}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            return Err(KvStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Store a value. Last write wins.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        // '~' is outside the key charset, so temp files can never collide
        // with an entry or show up in list().
        let tmp = self.root.join(format!(
            "~{key}.{}.tmp",
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, bytes = value.len(), "stored entry");
        Ok(())
    }

    /// Fetch a value, `None` if the key is absent or invalid.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        // An invalid key can never have been stored, so it is a miss rather
        // than an error here.
        let Ok(path) = self.entry_path(key) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a key. Removing an absent key is a no-op.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List every stored key, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Skip in-flight temp files.
            if is_valid_key(name) {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<u64> {
        Ok(self.list().await?.len() as u64)
    }
}
