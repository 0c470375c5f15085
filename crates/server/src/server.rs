//! The KV probe server: cookie gate, handshake emit, serve loop.
//!
//! The serve loops are exposed as free functions so the test infrastructure
//! can embed a server in-process; [`KvProbeServer::run`] wires them to the
//! cookie gate, the stdout handshake line, and shutdown signals for the real
//! binary.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tarpc::server::{BaseChannel, Channel};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info};

use crosswire_ca::CaSession;
use crosswire_kv_store::{ConnectionMeta, FsKvStorage, KvServiceImpl};
use crosswire_wire_protocol::{
    encode_cert_field, CryptoConfig, HandshakeConfig, HandshakeLine, KvService, Network,
    PostcardFormat, TlsMode, CORE_PROTOCOL_VERSION, KV_PROTOCOL_VERSION, RPC_PROTOCOL,
};

use crate::cookie::{check_cookie, ServerState};
use crate::error::{Result, ServerError};
use crate::tls::{prepare_server_tls, ManualTlsPaths, ServerTlsContext};

/// Where the server listens.
#[derive(Debug, Clone)]
pub enum ListenSpec {
    /// Loopback TCP; port 0 asks the OS for an ephemeral port.
    Tcp { port: u16 },
    /// Unix domain socket at the given path.
    LocalSocket { path: PathBuf },
}

/// Everything needed to run one KV probe server process.
#[derive(Debug, Clone)]
pub struct KvProbeServer {
    pub handshake: HandshakeConfig,
    pub listen: ListenSpec,
    pub tls_mode: TlsMode,
    pub crypto: CryptoConfig,
    pub manual_tls: Option<ManualTlsPaths>,
    /// Bundle directory exported by the launcher (auto mode); `None` makes
    /// an auto-mode server issue its own bundle.
    pub auto_tls_dir: Option<PathBuf>,
    pub storage_root: PathBuf,
    pub enrichment_enabled: bool,
}

impl KvProbeServer {
    /// Run to completion: cookie check, bind, handshake emit, serve until a
    /// shutdown signal.
    pub async fn run(self) -> Result<()> {
        let mut state = ServerState::NotStarted;
        transition(&mut state, ServerState::AwaitingCookieCheck);

        if let Err(e) = check_cookie(&self.handshake) {
            transition(&mut state, ServerState::Terminated);
            return Err(e);
        }

        transition(&mut state, ServerState::AwaitingHandshakeEmit);

        let tls = Arc::new(
            prepare_server_tls(
                self.tls_mode,
                &self.crypto,
                self.manual_tls.as_ref(),
                self.auto_tls_dir.as_deref(),
                &CaSession::new(),
            )
            .await?,
        );

        let storage = Arc::new(FsKvStorage::open(&self.storage_root).await.map_err(
            |e| ServerError::Configuration(format!("opening storage root: {e}")),
        )?);

        match &self.listen {
            ListenSpec::Tcp { port } => {
                let listener = TcpListener::bind(("127.0.0.1", *port)).await?;
                let address = listener.local_addr()?.to_string();
                emit_handshake(Network::Tcp, &address, &tls)?;
                transition(&mut state, ServerState::Serving);
                info!(%address, tls_mode = %self.tls_mode, "serving KV probe over tcp");
                tokio::select! {
                    _ = shutdown_signal() => info!("shutdown signal received"),
                    _ = serve_tcp_listener(listener, tls, storage, self.enrichment_enabled) => {}
                }
            }
            ListenSpec::LocalSocket { path } => {
                let listener = UnixListener::bind(path)?;
                let address = path.display().to_string();
                emit_handshake(Network::LocalSocket, &address, &tls)?;
                transition(&mut state, ServerState::Serving);
                info!(%address, tls_mode = %self.tls_mode, "serving KV probe over local socket");
                tokio::select! {
                    _ = shutdown_signal() => info!("shutdown signal received"),
                    _ = serve_unix_listener(listener, tls, storage, self.enrichment_enabled) => {}
                }
                let _ = std::fs::remove_file(path);
            }
        }

        transition(&mut state, ServerState::Terminated);
        Ok(())
    }
}

/// Accept TCP connections forever, one task per connection.
pub async fn serve_tcp_listener(
    listener: TcpListener,
    tls: Arc<ServerTlsContext>,
    storage: Arc<FsKvStorage>,
    enrichment_enabled: bool,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                handle_accepted(
                    stream,
                    peer.to_string(),
                    Arc::clone(&tls),
                    Arc::clone(&storage),
                    enrichment_enabled,
                );
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }
}

/// Accept Unix-socket connections forever, one task per connection.
pub async fn serve_unix_listener(
    listener: UnixListener,
    tls: Arc<ServerTlsContext>,
    storage: Arc<FsKvStorage>,
    enrichment_enabled: bool,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                handle_accepted(
                    stream,
                    "local-socket".to_string(),
                    Arc::clone(&tls),
                    Arc::clone(&storage),
                    enrichment_enabled,
                );
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }
}

fn handle_accepted<S>(
    stream: S,
    peer: String,
    tls: Arc<ServerTlsContext>,
    storage: Arc<FsKvStorage>,
    enrichment_enabled: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let meta = ConnectionMeta {
        peer_endpoint: peer.clone(),
        tls_mode: tls.mode,
        crypto_config: tls.crypto_config_id.clone(),
        cert_fingerprint: tls.fingerprint().map(|f| f.to_string()),
    };
    let service = KvServiceImpl::new(storage, enrichment_enabled, meta);
    tokio::spawn(async move {
        debug!(%peer, "connection accepted");
        let result = match &tls.acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => serve_stream(tls_stream, service).await,
                Err(e) => {
                    error!(%peer, "TLS accept failed: {e}");
                    return;
                }
            },
            None => serve_stream(stream, service).await,
        };
        if let Err(e) = result {
            error!(%peer, "connection error: {e}");
        }
        debug!(%peer, "connection closed");
    });
}

/// Run the tarpc channel over one established stream.
async fn serve_stream<S>(stream: S, service: KvServiceImpl) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let transport = tarpc::serde_transport::new(framed, PostcardFormat);
    let channel = BaseChannel::with_defaults(transport);
    let responses = channel.execute(service.serve());
    tokio::pin!(responses);
    // Requests on one channel are handled strictly in order.
    while let Some(response) = responses.next().await {
        response.await;
    }
    Ok(())
}

/// Write the startup line. Exactly once, newline-terminated, flushed.
fn emit_handshake(network: Network, address: &str, tls: &ServerTlsContext) -> Result<()> {
    let cert_b64 = tls
        .advertised_cert_der
        .as_deref()
        .map(encode_cert_field)
        .unwrap_or_default();
    let line = HandshakeLine {
        core_version: CORE_PROTOCOL_VERSION,
        protocol_version: KV_PROTOCOL_VERSION,
        network,
        address: address.to_string(),
        protocol: RPC_PROTOCOL.to_string(),
        cert_b64,
    };
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    writeln!(lock, "{line}")?;
    lock.flush()?;
    Ok(())
}

fn transition(state: &mut ServerState, next: ServerState) {
    debug!(from = state.as_str(), to = next.as_str(), "state transition");
    *state = next;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
