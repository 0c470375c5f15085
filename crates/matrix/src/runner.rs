//! The matrix orchestrator.
//!
//! For every `(client runtime, server runtime, crypto config)` triple that
//! the validator does not exclude, a cell gets an isolated temp directory
//! and an ephemeral endpoint, a freshly spawned server process, and the
//! configured scenarios over a newly established channel. Cells run on a
//! bounded worker pool; one cell's crash never aborts its siblings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crosswire_ca::{write_bundle_files, CaSession};
use crosswire_client::{
    Establisher, KvClient, PluginProcess, SpawnOptions, TlsChannelConfig,
};
use crosswire_wire_protocol::{
    CryptoConfig, HandshakeConfig, HandshakeLine, TlsMode, AUTO_TLS_DIR_ENV, RPC_PROTOCOL,
    STORAGE_ROOT_ENV, TLS_CURVE_ENV, TLS_KEY_TYPE_ENV, TLS_MODE_ENV, TLS_RSA_BITS_ENV,
};

use crate::compat::validate;
use crate::error::MatrixError;
use crate::report::{CellId, CellStatus, MatrixReport, MatrixRunResult};
use crate::scenario::Scenario;

/// Environment variables handed to an external client harness.
pub const CLIENT_ENDPOINT_ENV: &str = "CROSSWIRE_ENDPOINT";
pub const CLIENT_NETWORK_ENV: &str = "CROSSWIRE_NETWORK";

/// One independently built runtime under test.
#[derive(Debug, Clone)]
pub struct RuntimeSpec {
    pub name: String,
    /// Command launching this runtime's server harness.
    pub server_command: Vec<String>,
    /// Command driving this runtime's client harness against a running
    /// server; `None` means the native in-process client is used.
    pub client_command: Option<Vec<String>>,
}

impl RuntimeSpec {
    /// The native runtime: servers spawned from `server_command`, clients
    /// driven in-process.
    pub fn native(server_command: Vec<String>) -> Self {
        Self {
            name: "rust".to_string(),
            server_command,
            client_command: None,
        }
    }
}

/// Suite-level configuration.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub clients: Vec<RuntimeSpec>,
    pub servers: Vec<RuntimeSpec>,
    pub cryptos: Vec<CryptoConfig>,
    pub scenarios: Vec<Scenario>,
    pub tls_mode: TlsMode,
    pub handshake: HandshakeConfig,
    /// Bounded worker pool size.
    pub workers: usize,
    /// Attempt cells the validator marks unsupported anyway.
    pub force: bool,
    pub startup_timeout: Duration,
    /// Budget for an external client harness run.
    pub external_client_timeout: Duration,
    /// Whole-suite budget; unfinished cells are marked timed out.
    pub suite_timeout: Duration,
    /// SIGTERM grace before a server is killed.
    pub shutdown_grace: Duration,
}

impl MatrixConfig {
    pub fn new(clients: Vec<RuntimeSpec>, servers: Vec<RuntimeSpec>) -> Self {
        Self {
            clients,
            servers,
            cryptos: vec![CryptoConfig::EC_P256],
            scenarios: Scenario::all().to_vec(),
            tls_mode: TlsMode::Auto,
            handshake: HandshakeConfig::default(),
            workers: 4,
            force: false,
            startup_timeout: Duration::from_secs(10),
            external_client_timeout: Duration::from_secs(60),
            suite_timeout: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Runs the whole matrix and produces the report.
pub struct MatrixRunner {
    config: MatrixConfig,
    ca_session: Arc<CaSession>,
}

impl MatrixRunner {
    pub fn new(config: MatrixConfig) -> Self {
        Self {
            config,
            ca_session: Arc::new(CaSession::new()),
        }
    }

    /// Every cell of the cross product, in deterministic order.
    fn cells(&self) -> Vec<(CellId, RuntimeSpec, RuntimeSpec, CryptoConfig)> {
        let mut cells = Vec::new();
        for client in &self.config.clients {
            for server in &self.config.servers {
                for crypto in &self.config.cryptos {
                    cells.push((
                        CellId {
                            client_runtime: client.name.clone(),
                            server_runtime: server.name.clone(),
                            crypto_id: crypto.id(),
                        },
                        client.clone(),
                        server.clone(),
                        *crypto,
                    ));
                }
            }
        }
        cells
    }

    /// Run every cell; never panics out of a sibling's failure.
    pub async fn run(&self) -> MatrixReport {
        let cells = self.cells();
        info!(cells = cells.len(), workers = self.config.workers, "starting matrix run");

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let finished: Arc<Mutex<HashMap<CellId, MatrixRunResult>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut join_set = JoinSet::new();
        for (cell_id, client, server, crypto) in cells.clone() {
            let semaphore = Arc::clone(&semaphore);
            let finished = Arc::clone(&finished);
            let config = self.config.clone();
            let ca_session = Arc::clone(&self.ca_session);
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("worker semaphore never closes");
                let started = Instant::now();
                let outcome = run_cell(&config, &ca_session, &client, &server, &crypto).await;
                let result = match outcome {
                    Ok(()) => MatrixRunResult {
                        cell: cell_id.clone(),
                        status: CellStatus::Passed,
                        duration: started.elapsed(),
                        error_detail: None,
                    },
                    Err(CellOutcome::Skipped(detail)) => MatrixRunResult {
                        cell: cell_id.clone(),
                        status: CellStatus::Skipped,
                        duration: started.elapsed(),
                        error_detail: Some(detail),
                    },
                    Err(CellOutcome::Failed(error)) => {
                        warn!(cell = %cell_id, error = %error, "cell failed");
                        MatrixRunResult {
                            cell: cell_id.clone(),
                            status: CellStatus::Failed,
                            duration: started.elapsed(),
                            error_detail: Some(format!("{}: {}", error.kind(), error)),
                        }
                    }
                };
                finished
                    .lock()
                    .expect("results accumulator poisoned")
                    .insert(cell_id, result);
            });
        }

        let deadline = tokio::time::sleep(self.config.suite_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Err(e)) => warn!("cell task panicked: {e}"),
                    Some(Ok(())) => {}
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("suite timeout reached, aborting unfinished cells");
                    // Dropping the tasks kills their server processes
                    // (kill_on_drop) after the grace the select already gave.
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        let mut finished = finished.lock().expect("results accumulator poisoned");
        let mut report = MatrixReport::default();
        for (cell_id, ..) in cells {
            let result = finished.remove(&cell_id).unwrap_or(MatrixRunResult {
                cell: cell_id,
                status: CellStatus::TimedOut,
                duration: self.config.suite_timeout,
                error_detail: Some(format!("{}", MatrixError::SuiteTimeout)),
            });
            report.results.push(result);
        }
        info!("{}", report.render());
        report
    }
}

/// Cell-internal outcome distinct from the recorded status.
enum CellOutcome {
    Skipped(String),
    Failed(MatrixError),
}

impl From<MatrixError> for CellOutcome {
    fn from(err: MatrixError) -> Self {
        CellOutcome::Failed(err)
    }
}

async fn run_cell(
    config: &MatrixConfig,
    ca_session: &Arc<CaSession>,
    client: &RuntimeSpec,
    server: &RuntimeSpec,
    crypto: &CryptoConfig,
) -> Result<(), CellOutcome> {
    // Pre-flight: consult the knowledge base before any resource exists.
    let validation = validate(&client.name, &server.name, crypto);
    let mut known_incompatibility = None;
    if !validation.supported {
        let reason = validation
            .reason
            .clone()
            .unwrap_or_else(|| "marked unsupported".to_string());
        if !config.force {
            let mut detail = format!(
                "{}",
                MatrixError::IncompatiblePairing {
                    reason: reason.clone()
                }
            );
            if !validation.suggested_alternatives.is_empty() {
                detail.push_str(&format!(
                    " (try: {})",
                    validation.suggested_alternatives.join(", ")
                ));
            }
            return Err(CellOutcome::Skipped(detail));
        }
        known_incompatibility = Some(reason);
    }

    // Isolated working directory: storage and exported TLS material live and
    // die with the cell.
    let work_dir = TempDir::new()
        .map_err(|e| MatrixError::Configuration(format!("cell work dir: {e}")))?;
    let storage_dir = work_dir.path().join("kv");
    let tls_dir = work_dir.path().join("tls");

    let mut envs = vec![
        (
            STORAGE_ROOT_ENV.to_string(),
            storage_dir.display().to_string(),
        ),
        (TLS_MODE_ENV.to_string(), config.tls_mode.to_string()),
    ];
    match crypto.algorithm {
        crosswire_wire_protocol::KeyAlgorithm::Rsa { bits } => {
            envs.push((TLS_KEY_TYPE_ENV.to_string(), "rsa".to_string()));
            envs.push((TLS_RSA_BITS_ENV.to_string(), bits.to_string()));
        }
        crosswire_wire_protocol::KeyAlgorithm::Ecdsa { curve } => {
            envs.push((TLS_KEY_TYPE_ENV.to_string(), "ec".to_string()));
            envs.push((TLS_CURVE_ENV.to_string(), curve.secg_name().to_string()));
        }
    }

    if config.tls_mode == TlsMode::Auto {
        let bundle = ca_session
            .issue(crypto)
            .await
            .map_err(MatrixError::from)?;
        write_bundle_files(&bundle, &tls_dir).map_err(MatrixError::from)?;
        envs.push((AUTO_TLS_DIR_ENV.to_string(), tls_dir.display().to_string()));
    }

    // Spawn the server and wait for its handshake line.
    let mut spawn = SpawnOptions::new(server.server_command.clone());
    spawn.envs = envs.clone();
    spawn.handshake = config.handshake.clone();
    spawn.startup_timeout = config.startup_timeout;

    let mut process = PluginProcess::spawn(spawn).map_err(MatrixError::from)?;
    let handshake = match process.await_handshake().await {
        Ok(handshake) => handshake,
        Err(e) => {
            process.shutdown(config.shutdown_grace).await;
            return Err(MatrixError::from(e).into());
        }
    };

    if handshake.protocol != RPC_PROTOCOL {
        process.shutdown(config.shutdown_grace).await;
        return Err(MatrixError::Configuration(format!(
            "server speaks {}, expected {RPC_PROTOCOL}",
            handshake.protocol
        ))
        .into());
    }

    let run_result = match &client.client_command {
        Some(command) => {
            run_external_client(config, command, &handshake, &envs).await
        }
        None => {
            run_native_client(
                config,
                ca_session,
                crypto,
                &handshake,
                known_incompatibility,
            )
            .await
        }
    };

    // A crashed server outranks a scenario failure in diagnostics.
    if run_result.is_err() {
        if let Some(code) = process.exit_code() {
            let detail = format!(
                "server exited with {code:?} mid-scenario; output tail:\n{}",
                process.output_tail()
            );
            process.shutdown(config.shutdown_grace).await;
            return Err(MatrixError::HarnessCrash { detail }.into());
        }
    }

    process.shutdown(config.shutdown_grace).await;
    run_result.map_err(CellOutcome::from)
}

async fn run_native_client(
    config: &MatrixConfig,
    ca_session: &Arc<CaSession>,
    crypto: &CryptoConfig,
    handshake: &HandshakeLine,
    known_incompatibility: Option<String>,
) -> Result<(), MatrixError> {
    let mut channel = match config.tls_mode {
        TlsMode::Disabled => TlsChannelConfig::plaintext(),
        TlsMode::Auto => TlsChannelConfig::auto(*crypto, handshake.server_cert_fingerprint()),
        TlsMode::Manual => {
            return Err(MatrixError::Configuration(
                "matrix cells drive manual TLS through runtime-specific flags".to_string(),
            ))
        }
    };
    channel.known_incompatibility = known_incompatibility;

    let establisher = Establisher::new(Arc::clone(ca_session));
    let kv: KvClient = establisher.connect(&handshake.endpoint(), &channel).await?;

    // Readiness ping before the first scenario.
    kv.health_check().await?;

    for scenario in &config.scenarios {
        scenario.run(&kv).await?;
        debug!(scenario = scenario.name(), "scenario passed");
    }
    Ok(())
}

/// Drive an external runtime's client harness and judge it by exit status.
async fn run_external_client(
    config: &MatrixConfig,
    command: &[String],
    handshake: &HandshakeLine,
    cell_envs: &[(String, String)],
) -> Result<(), MatrixError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| MatrixError::Configuration("empty client command".to_string()))?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .envs(cell_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env(CLIENT_ENDPOINT_ENV, &handshake.address)
        .env(CLIENT_NETWORK_ENV, handshake.network.as_str())
        .env(
            &config.handshake.cookie_key,
            &config.handshake.cookie_value,
        )
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MatrixError::Configuration(format!("spawning client harness: {e}")))?;

    let status = tokio::time::timeout(config.external_client_timeout, child.wait())
        .await
        .map_err(|_| MatrixError::HarnessCrash {
            detail: format!(
                "client harness still running after {:?}",
                config.external_client_timeout
            ),
        })?
        .map_err(|e| MatrixError::HarnessCrash {
            detail: format!("waiting for client harness: {e}"),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(MatrixError::HarnessCrash {
            detail: format!("client harness exited with {status}"),
        })
    }
}
