//! Session-scoped bundle cache with single-flight issuance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crosswire_wire_protocol::CryptoConfig;

use crate::error::{CaError, Result};
use crate::issuer::{issue_bundle, CertificateBundle};

/// Certificate authority for one conformance session.
///
/// `issue` generates a [`CertificateBundle`] at most once per config id:
/// concurrent callers for the same id block on, or receive, the one shared
/// result, while different ids issue independently and in parallel. The
/// cache lives exactly as long as the session object; bundles must never be
/// reused beyond it.
#[derive(Debug, Default)]
pub struct CaSession {
    bundles: Mutex<HashMap<String, Arc<OnceCell<Arc<CertificateBundle>>>>>,
}

impl CaSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue (or fetch the cached) bundle for a crypto config.
    pub async fn issue(&self, config: &CryptoConfig) -> Result<Arc<CertificateBundle>> {
        let cell = {
            let mut bundles = self.bundles.lock().expect("bundle cache poisoned");
            bundles.entry(config.id()).or_default().clone()
        };

        let config = *config;
        let bundle = cell
            .get_or_try_init(|| async move {
                // Key generation (RSA-4096 especially) is CPU-bound.
                let bundle = tokio::task::spawn_blocking(move || issue_bundle(&config))
                    .await
                    .map_err(|e| CaError::Generation(format!("issuer task failed: {e}")))??;
                Ok::<_, CaError>(Arc::new(bundle))
            })
            .await?;

        Ok(Arc::clone(bundle))
    }

    /// Fetch an already issued bundle without triggering issuance.
    pub fn cached(&self, config: &CryptoConfig) -> Option<Arc<CertificateBundle>> {
        let bundles = self.bundles.lock().expect("bundle cache poisoned");
        bundles
            .get(&config.id())
            .and_then(|cell| cell.get())
            .cloned()
    }
}
