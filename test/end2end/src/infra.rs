//! Test infrastructure: in-process KV probe servers on ephemeral ports.

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

use crosswire_ca::CaSession;
use crosswire_client::{Establisher, KvClient, ManualClientTlsPaths, TlsChannelConfig};
use crosswire_kv_store::FsKvStorage;
use crosswire_server::{prepare_server_tls, serve_tcp_listener, ManualTlsPaths};
use crosswire_wire_protocol::{
    encode_cert_field, CryptoConfig, HandshakeLine, Network, TlsMode, CORE_PROTOCOL_VERSION,
    KV_PROTOCOL_VERSION, RPC_PROTOCOL,
};

// Initialize the crypto provider for rustls exactly once per test binary.
pub fn init_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("failed to install crypto provider");
    });
}

/// An in-process KV probe server plus everything a client needs to reach it.
pub struct TestInfrastructure {
    pub server_handle: JoinHandle<()>,
    /// The handshake line this server would have printed on stdout.
    pub handshake: HandshakeLine,
    pub ca_session: Arc<CaSession>,
    pub crypto: CryptoConfig,
    pub tls_mode: TlsMode,
    temp_dirs: Vec<TempDir>,
}

impl TestInfrastructure {
    /// Start a server with the given channel mode on an ephemeral port.
    pub async fn setup(
        tls_mode: TlsMode,
        crypto: CryptoConfig,
        enrichment_enabled: bool,
    ) -> Result<Self> {
        init_crypto_provider();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let ca_session = Arc::new(CaSession::new());
        let storage_dir = TempDir::new().context("creating storage dir")?;

        // Manual mode exercises the file-loading path: export the bundle and
        // feed it back through PEM files like a caller would.
        let (manual_paths, manual_dir) = if tls_mode == TlsMode::Manual {
            let bundle = ca_session.issue(&crypto).await?;
            let dir = TempDir::new().context("creating tls dir")?;
            let exported = crosswire_ca::write_bundle_files(&bundle, dir.path())?;
            (
                Some(ManualTlsPaths {
                    cert: exported.server_cert,
                    key: exported.server_key,
                    ca: Some(exported.ca_cert),
                }),
                Some(dir),
            )
        } else {
            (None, None)
        };

        let tls = Arc::new(
            prepare_server_tls(tls_mode, &crypto, manual_paths.as_ref(), None, &ca_session)
                .await?,
        );

        let storage = Arc::new(FsKvStorage::open(storage_dir.path()).await?);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();

        let handshake = HandshakeLine {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version: KV_PROTOCOL_VERSION,
            network: Network::Tcp,
            address: address.clone(),
            protocol: RPC_PROTOCOL.to_string(),
            cert_b64: tls
                .advertised_cert_der
                .as_deref()
                .map(encode_cert_field)
                .unwrap_or_default(),
        };

        debug!(%address, mode = %tls_mode, "test server listening");
        let server_handle = tokio::spawn(serve_tcp_listener(
            listener,
            tls,
            storage,
            enrichment_enabled,
        ));

        let mut temp_dirs = vec![storage_dir];
        temp_dirs.extend(manual_dir);

        Ok(Self {
            server_handle,
            handshake,
            ca_session,
            crypto,
            tls_mode,
            temp_dirs,
        })
    }

    /// Channel config matching how this server was set up.
    pub fn channel_config(&self) -> Result<TlsChannelConfig> {
        Ok(match self.tls_mode {
            TlsMode::Disabled => TlsChannelConfig::plaintext(),
            TlsMode::Auto => {
                TlsChannelConfig::auto(self.crypto, self.handshake.server_cert_fingerprint())
            }
            TlsMode::Manual => {
                let dir = self
                    .temp_dirs
                    .get(1)
                    .context("manual infra keeps its tls dir")?;
                TlsChannelConfig::manual(
                    self.crypto,
                    ManualClientTlsPaths {
                        cert: dir.path().join(crosswire_ca::CLIENT_CERT_FILE),
                        key: dir.path().join(crosswire_ca::CLIENT_KEY_FILE),
                        ca: dir.path().join(crosswire_ca::CA_CERT_FILE),
                    },
                )
            }
        })
    }

    /// Connect a KV client the way a launching harness would.
    pub async fn connect(&self) -> Result<KvClient> {
        let config = self.channel_config()?;
        self.connect_with(&config).await
    }

    /// Connect with an explicit channel config (for negative tests).
    pub async fn connect_with(
        &self,
        config: &TlsChannelConfig,
    ) -> Result<KvClient> {
        let establisher = Establisher::new(Arc::clone(&self.ca_session));
        let client = tokio::time::timeout(
            Duration::from_secs(10),
            establisher.connect(&self.handshake.endpoint(), config),
        )
        .await
        .context("connect timed out")??;
        Ok(client)
    }

    /// Tear the server down.
    pub async fn cleanup(self) {
        self.server_handle.abort();
        let _ = self.server_handle.await;
        drop(self.temp_dirs);
    }
}
