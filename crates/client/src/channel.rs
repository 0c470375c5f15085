//! Secure channel establishment.
//!
//! Given a TLS mode, the establisher turns an advertised endpoint into a
//! ready [`KvClient`]. In auto mode the client's identity comes from the
//! session certificate bundle and the server's certificate must both chain
//! to the bundle CA and match the fingerprint advertised in the handshake
//! line (trust-on-first-use against tampering between the plaintext startup
//! line and the encrypted handshake). Failures are phase-tagged so a
//! cross-runtime incompatibility reads as `cipher_negotiation` rather than
//! an opaque connection error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{AlertDescription, ClientConfig, DigitallySignedStruct, RootCertStore};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crosswire_ca::CaSession;
use crosswire_wire_protocol::{CertFingerprint, CryptoConfig, Endpoint, Network, TlsMode};

use crate::error::{ClientError, HandshakePhase, Result};
use crate::kv_client::KvClient;

/// Caller-supplied certificate material for `manual` mode.
#[derive(Debug, Clone)]
pub struct ManualClientTlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// CA used to verify the server.
    pub ca: PathBuf,
}

impl ManualClientTlsPaths {
    fn validate(&self) -> Result<()> {
        for path in [&self.cert, &self.key, &self.ca] {
            std::fs::metadata(path).map_err(|e| {
                ClientError::Configuration(format!("TLS file {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }
}

/// Channel parameters for one connection.
#[derive(Debug, Clone)]
pub struct TlsChannelConfig {
    pub mode: TlsMode,
    pub crypto: CryptoConfig,
    pub manual: Option<ManualClientTlsPaths>,
    /// Fingerprint advertised in the handshake line, pinned during the TLS
    /// handshake (auto mode).
    pub pinned_fingerprint: Option<CertFingerprint>,
    pub connect_timeout: Duration,
    /// Per-RPC timeout applied by the resulting client.
    pub call_timeout: Duration,
    /// Bounded connection attempts; never retries indefinitely.
    pub max_attempts: u32,
    /// Set when the compatibility matrix already marks this pairing
    /// unsupported, so failures are labeled as such instead of transient.
    pub known_incompatibility: Option<String>,
}

impl TlsChannelConfig {
    pub fn plaintext() -> Self {
        Self {
            mode: TlsMode::Disabled,
            crypto: CryptoConfig::EC_P256,
            manual: None,
            pinned_fingerprint: None,
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            max_attempts: 1,
            known_incompatibility: None,
        }
    }

    pub fn auto(crypto: CryptoConfig, pinned: Option<CertFingerprint>) -> Self {
        Self {
            mode: TlsMode::Auto,
            crypto,
            pinned_fingerprint: pinned,
            ..Self::plaintext()
        }
    }

    pub fn manual(crypto: CryptoConfig, paths: ManualClientTlsPaths) -> Self {
        Self {
            mode: TlsMode::Manual,
            crypto,
            manual: Some(paths),
            ..Self::plaintext()
        }
    }
}

/// Builds channels against advertised endpoints.
pub struct Establisher {
    ca_session: Arc<CaSession>,
}

impl Establisher {
    pub fn new(ca_session: Arc<CaSession>) -> Self {
        Self { ca_session }
    }

    /// Connect to an endpoint with bounded attempts.
    pub async fn connect(&self, endpoint: &Endpoint, config: &TlsChannelConfig) -> Result<KvClient> {
        let attempts = config.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.connect_once(endpoint, config).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "connection attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let err = last_err.unwrap_or_else(|| {
            ClientError::Configuration("no connection attempts were made".to_string())
        });
        match &config.known_incompatibility {
            Some(reason) => Err(ClientError::KnownIncompatible {
                reason: reason.clone(),
                source: Box::new(err),
            }),
            None => Err(err),
        }
    }

    async fn connect_once(&self, endpoint: &Endpoint, config: &TlsChannelConfig) -> Result<KvClient> {
        debug!(network = %endpoint.network, address = %endpoint.address, mode = %config.mode, "connecting");
        match endpoint.network {
            Network::Tcp => {
                let stream = timeout(config.connect_timeout, TcpStream::connect(&endpoint.address))
                    .await
                    .map_err(|_| connect_timeout_error(config))??;
                stream.set_nodelay(true)?;
                self.secure_and_wrap(stream, config).await
            }
            Network::LocalSocket => {
                let stream = timeout(
                    config.connect_timeout,
                    UnixStream::connect(Path::new(&endpoint.address)),
                )
                .await
                .map_err(|_| connect_timeout_error(config))??;
                self.secure_and_wrap(stream, config).await
            }
        }
    }

    async fn secure_and_wrap<S>(&self, stream: S, config: &TlsChannelConfig) -> Result<KvClient>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        if config.mode == TlsMode::Disabled {
            return Ok(KvClient::from_stream(stream, config.call_timeout));
        }

        let connector = self.tls_connector(config).await?;
        // Bundle leafs carry the loopback names in their SAN.
        let server_name = ServerName::try_from("localhost")
            .map_err(|e| ClientError::Configuration(format!("server name: {e}")))?
            .to_owned();

        let tls_stream = timeout(config.connect_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| connect_timeout_error(config))?
            .map_err(|e| classify_tls_error(&e))?;

        Ok(KvClient::from_stream(tls_stream, config.call_timeout))
    }

    async fn tls_connector(&self, config: &TlsChannelConfig) -> Result<TlsConnector> {
        let client_config = match config.mode {
            TlsMode::Disabled => unreachable!("plaintext handled by caller"),
            TlsMode::Auto => {
                let bundle = self.ca_session.issue(&config.crypto).await?;
                let mut roots = RootCertStore::empty();
                roots
                    .add(CertificateDer::from(bundle.ca_cert_der.clone()))
                    .map_err(|e| ClientError::Configuration(format!("adding CA root: {e}")))?;
                let verifier = pinned_verifier(roots, config.pinned_fingerprint)?;

                let cert_chain = vec![CertificateDer::from(bundle.client.cert_der.clone())];
                let key =
                    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(bundle.client.key_der.clone()));

                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(verifier)
                    .with_client_auth_cert(cert_chain, key)
                    .map_err(|e| ClientError::Configuration(format!("client config: {e}")))?
            }
            TlsMode::Manual => {
                let paths = config.manual.as_ref().ok_or_else(|| {
                    ClientError::Configuration(
                        "manual TLS mode requires certificate paths".to_string(),
                    )
                })?;
                paths.validate()?;

                let mut roots = RootCertStore::empty();
                for cert in load_cert_chain(&paths.ca)? {
                    roots
                        .add(cert)
                        .map_err(|e| ClientError::Configuration(format!("adding CA root: {e}")))?;
                }
                let cert_chain = load_cert_chain(&paths.cert)?;
                let key = load_private_key(&paths.key)?;

                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_client_auth_cert(cert_chain, key)
                    .map_err(|e| ClientError::Configuration(format!("client config: {e}")))?
            }
        };

        Ok(TlsConnector::from(Arc::new(client_config)))
    }
}

fn connect_timeout_error(config: &TlsChannelConfig) -> ClientError {
    ClientError::TlsHandshake {
        phase: HandshakePhase::CipherNegotiation,
        detail: format!("no transport handshake within {:?}", config.connect_timeout),
    }
}

/// Server certificate verifier that checks the pinned fingerprint before
/// delegating chain validation to webpki.
#[derive(Debug)]
struct PinnedServerCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pinned: Option<CertFingerprint>,
}

fn pinned_verifier(
    roots: RootCertStore,
    pinned: Option<CertFingerprint>,
) -> Result<Arc<PinnedServerCertVerifier>> {
    let inner = WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ClientError::Configuration(format!("server verifier: {e}")))?;
    Ok(Arc::new(PinnedServerCertVerifier { inner, pinned }))
}

impl ServerCertVerifier for PinnedServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some(pinned) = &self.pinned {
            let presented = CertFingerprint::of_der(end_entity.as_ref());
            if presented != *pinned {
                tracing::error!(
                    expected = %pinned,
                    presented = %presented,
                    "server certificate does not match the handshake-advertised fingerprint"
                );
                return Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::ApplicationVerificationFailure,
                ));
            }
            debug!(fingerprint = %presented, "pinned server fingerprint verified");
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Attribute a TLS failure to a handshake phase.
fn classify_tls_error(err: &std::io::Error) -> ClientError {
    let phase = match err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) {
        Some(rustls::Error::InvalidCertificate(_)) => HandshakePhase::ServerAuth,
        Some(rustls::Error::AlertReceived(alert)) => match alert {
            AlertDescription::BadCertificate
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateUnknown
            | AlertDescription::UnknownCA
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::AccessDenied
            | AlertDescription::CertificateRequired
            | AlertDescription::DecryptError => HandshakePhase::ClientAuth,
            _ => HandshakePhase::CipherNegotiation,
        },
        Some(rustls::Error::PeerIncompatible(_)) => HandshakePhase::CipherNegotiation,
        Some(rustls::Error::NoCertificatesPresented) => HandshakePhase::ClientAuth,
        _ => HandshakePhase::CipherNegotiation,
    };
    ClientError::TlsHandshake {
        phase,
        detail: err.to_string(),
    }
}

/// Read every CERTIFICATE block from a PEM file.
fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Configuration(format!("reading {}: {e}", path.display())))?;
    let blocks = pem::parse_many(&contents)
        .map_err(|e| ClientError::Configuration(format!("parsing {}: {e}", path.display())))?;
    let certs: Vec<_> = blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();
    if certs.is_empty() {
        return Err(ClientError::Configuration(format!(
            "no CERTIFICATE blocks in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key block from a PEM file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Configuration(format!("reading {}: {e}", path.display())))?;
    let blocks = pem::parse_many(&contents)
        .map_err(|e| ClientError::Configuration(format!("parsing {}: {e}", path.display())))?;
    for block in blocks {
        let key = match block.tag() {
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents())),
            "RSA PRIVATE KEY" => PrivateKeyDer::Pkcs1(block.into_contents().into()),
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(block.into_contents().into()),
            _ => continue,
        };
        return Ok(key);
    }
    Err(ClientError::Configuration(format!(
        "no private key block in {}",
        path.display()
    )))
}
