//! Server-side TLS setup for the three channel modes.
//!
//! `disabled` leaves the stream untouched. `auto` derives everything from a
//! session certificate bundle and requires client certificates chained to
//! the bundle CA. `manual` loads caller-supplied PEM files, validating their
//! existence up front so a typo fails fast instead of surfacing as an opaque
//! handshake error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crosswire_ca::{CaSession, CertificateBundle};
use crosswire_wire_protocol::{CertFingerprint, CryptoConfig, TlsMode};

use crate::error::{Result, ServerError};

/// Caller-supplied certificate material for `manual` mode.
#[derive(Debug, Clone)]
pub struct ManualTlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// CA used to verify client certificates; without it the server does not
    /// request client auth.
    pub ca: Option<PathBuf>,
}

impl ManualTlsPaths {
    /// Fail fast if any referenced file is missing or unreadable.
    pub fn validate(&self) -> Result<()> {
        let mut paths = vec![&self.cert, &self.key];
        if let Some(ca) = &self.ca {
            paths.push(ca);
        }
        for path in paths {
            std::fs::metadata(path).map_err(|e| {
                ServerError::Configuration(format!("TLS file {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }
}

/// Prepared TLS state for a server invocation.
pub struct ServerTlsContext {
    pub mode: TlsMode,
    /// `None` in disabled mode.
    pub acceptor: Option<TlsAcceptor>,
    /// Leaf certificate advertised in the handshake line (auto mode only).
    pub advertised_cert_der: Option<Vec<u8>>,
    pub crypto_config_id: Option<String>,
}

impl std::fmt::Debug for ServerTlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTlsContext")
            .field("mode", &self.mode)
            .field("acceptor", &self.acceptor.as_ref().map(|_| "<TlsAcceptor>"))
            .field("advertised_cert_der", &self.advertised_cert_der)
            .field("crypto_config_id", &self.crypto_config_id)
            .finish()
    }
}

impl ServerTlsContext {
    pub fn fingerprint(&self) -> Option<CertFingerprint> {
        self.advertised_cert_der
            .as_deref()
            .map(CertFingerprint::of_der)
    }
}

/// Build the TLS context for the configured mode.
///
/// In auto mode, `auto_dir` points at a bundle exported by the launching
/// client so both ends chain to the same CA; a standalone server without it
/// issues its own bundle from `ca_session`.
pub async fn prepare_server_tls(
    mode: TlsMode,
    crypto: &CryptoConfig,
    manual: Option<&ManualTlsPaths>,
    auto_dir: Option<&Path>,
    ca_session: &CaSession,
) -> Result<ServerTlsContext> {
    match mode {
        TlsMode::Disabled => Ok(ServerTlsContext {
            mode,
            acceptor: None,
            advertised_cert_der: None,
            crypto_config_id: None,
        }),
        TlsMode::Auto => {
            if let Some(dir) = auto_dir {
                return auto_from_exported_dir(dir, crypto);
            }
            let bundle = ca_session.issue(crypto).await?;
            let config = auto_server_config(&bundle)?;
            debug!(
                crypto = %bundle.config_id,
                fingerprint = %bundle.server.fingerprint(),
                "auto mTLS acceptor ready"
            );
            Ok(ServerTlsContext {
                mode,
                acceptor: Some(TlsAcceptor::from(Arc::new(config))),
                advertised_cert_der: Some(bundle.server.cert_der.clone()),
                crypto_config_id: Some(bundle.config_id.clone()),
            })
        }
        TlsMode::Manual => {
            let paths = manual.ok_or_else(|| {
                ServerError::Configuration(
                    "manual TLS mode requires --tls-cert and --tls-key".to_string(),
                )
            })?;
            paths.validate()?;
            let config = manual_server_config(paths)?;
            Ok(ServerTlsContext {
                mode,
                acceptor: Some(TlsAcceptor::from(Arc::new(config))),
                advertised_cert_der: None,
                crypto_config_id: None,
            })
        }
    }
}

/// Auto mode fed by a launcher-exported bundle directory: serve the exported
/// server identity, require client certificates chained to the exported CA,
/// and advertise the exported leaf in the handshake line.
fn auto_from_exported_dir(dir: &Path, crypto: &CryptoConfig) -> Result<ServerTlsContext> {
    let ca_path = dir.join(crosswire_ca::CA_CERT_FILE);
    let cert_path = dir.join(crosswire_ca::SERVER_CERT_FILE);
    let key_path = dir.join(crosswire_ca::SERVER_KEY_FILE);

    let cert_chain = load_cert_chain(&cert_path)?;
    let key = load_private_key(&key_path)?;
    let advertised = cert_chain[0].as_ref().to_vec();

    let mut roots = RootCertStore::empty();
    for cert in load_cert_chain(&ca_path)? {
        roots
            .add(cert)
            .map_err(|e| ServerError::Tls(format!("adding CA root: {e}")))?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ServerError::Tls(format!("client verifier: {e}")))?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| ServerError::Tls(format!("server config: {e}")))?;

    debug!(dir = %dir.display(), "auto mTLS acceptor ready from exported bundle");
    Ok(ServerTlsContext {
        mode: TlsMode::Auto,
        acceptor: Some(TlsAcceptor::from(Arc::new(config))),
        advertised_cert_der: Some(advertised),
        crypto_config_id: Some(crypto.id()),
    })
}

fn auto_server_config(bundle: &CertificateBundle) -> Result<ServerConfig> {
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(bundle.ca_cert_der.clone()))
        .map_err(|e| ServerError::Tls(format!("adding CA root: {e}")))?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ServerError::Tls(format!("client verifier: {e}")))?;

    let cert_chain = vec![CertificateDer::from(bundle.server.cert_der.clone())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(bundle.server.key_der.clone()));

    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| ServerError::Tls(format!("server config: {e}")))
}

fn manual_server_config(paths: &ManualTlsPaths) -> Result<ServerConfig> {
    let cert_chain = load_cert_chain(&paths.cert)?;
    let key = load_private_key(&paths.key)?;

    let builder = match &paths.ca {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_cert_chain(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| ServerError::Tls(format!("adding CA root: {e}")))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| ServerError::Tls(format!("client verifier: {e}")))?;
            ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => ServerConfig::builder().with_no_client_auth(),
    };

    builder
        .with_single_cert(cert_chain, key)
        .map_err(|e| ServerError::Tls(format!("server config: {e}")))
}

/// Read every CERTIFICATE block from a PEM file.
pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Configuration(format!("reading {}: {e}", path.display())))?;
    let blocks = pem::parse_many(&contents)
        .map_err(|e| ServerError::Configuration(format!("parsing {}: {e}", path.display())))?;
    let certs: Vec<_> = blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();
    if certs.is_empty() {
        return Err(ServerError::Configuration(format!(
            "no CERTIFICATE blocks in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key block from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Configuration(format!("reading {}: {e}", path.display())))?;
    let blocks = pem::parse_many(&contents)
        .map_err(|e| ServerError::Configuration(format!("parsing {}: {e}", path.display())))?;
    for block in blocks {
        let key = match block.tag() {
            "PRIVATE KEY" => {
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents()))
            }
            "RSA PRIVATE KEY" => PrivateKeyDer::Pkcs1(block.into_contents().into()),
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(block.into_contents().into()),
            _ => continue,
        };
        return Ok(key);
    }
    Err(ServerError::Configuration(format!(
        "no private key block in {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn init_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[tokio::test]
    async fn disabled_mode_has_no_acceptor() {
        let session = CaSession::new();
        let ctx = prepare_server_tls(TlsMode::Disabled, &CryptoConfig::EC_P256, None, None, &session)
            .await
            .unwrap();
        assert!(ctx.acceptor.is_none());
        assert!(ctx.advertised_cert_der.is_none());
        assert!(session.cached(&CryptoConfig::EC_P256).is_none());
    }

    #[tokio::test]
    async fn auto_mode_advertises_the_bundle_leaf() {
        init_provider();
        let session = CaSession::new();
        let ctx = prepare_server_tls(TlsMode::Auto, &CryptoConfig::EC_P256, None, None, &session)
            .await
            .unwrap();
        assert!(ctx.acceptor.is_some());
        let bundle = session.cached(&CryptoConfig::EC_P256).unwrap();
        assert_eq!(ctx.advertised_cert_der.as_deref(), Some(&bundle.server.cert_der[..]));
        assert_eq!(ctx.fingerprint(), Some(bundle.server.fingerprint()));
    }

    #[tokio::test]
    async fn auto_mode_uses_the_exported_bundle_when_present() {
        init_provider();
        let bundle = crosswire_ca::issue_bundle(&CryptoConfig::EC_P256).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        crosswire_ca::write_bundle_files(&bundle, dir.path()).unwrap();

        let session = CaSession::new();
        let ctx = prepare_server_tls(
            TlsMode::Auto,
            &CryptoConfig::EC_P256,
            None,
            Some(dir.path()),
            &session,
        )
        .await
        .unwrap();
        assert!(ctx.acceptor.is_some());
        // The advertised leaf is the exported one, not a self-issued bundle.
        assert_eq!(ctx.advertised_cert_der.as_deref(), Some(&bundle.server.cert_der[..]));
        assert!(session.cached(&CryptoConfig::EC_P256).is_none());
    }

    #[tokio::test]
    async fn manual_mode_fails_fast_on_missing_files() {
        let session = CaSession::new();
        let paths = ManualTlsPaths {
            cert: "/nonexistent/server.crt".into(),
            key: "/nonexistent/server.key".into(),
            ca: None,
        };
        let err = prepare_server_tls(
            TlsMode::Manual,
            &CryptoConfig::EC_P256,
            Some(&paths),
            None,
            &session,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Configuration(_)));
    }

    #[tokio::test]
    async fn manual_mode_loads_pem_material() {
        init_provider();
        let bundle = crosswire_ca::issue_bundle(&CryptoConfig::EC_P256).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        let ca_path = dir.path().join("ca.crt");
        write!(std::fs::File::create(&cert_path).unwrap(), "{}", bundle.server.cert_pem).unwrap();
        write!(std::fs::File::create(&key_path).unwrap(), "{}", bundle.server.key_pem).unwrap();
        write!(std::fs::File::create(&ca_path).unwrap(), "{}", bundle.ca_cert_pem).unwrap();

        let paths = ManualTlsPaths {
            cert: cert_path,
            key: key_path,
            ca: Some(ca_path),
        };
        let session = CaSession::new();
        let ctx = prepare_server_tls(
            TlsMode::Manual,
            &CryptoConfig::EC_P256,
            Some(&paths),
            None,
            &session,
        )
        .await
        .unwrap();
        assert!(ctx.acceptor.is_some());
        // Manual mode advertises nothing in the handshake line.
        assert!(ctx.advertised_cert_der.is_none());
    }
}
