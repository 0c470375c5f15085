use thiserror::Error;

use crosswire_ca::CaError;
use crosswire_client::ClientError;

/// Errors recorded against a single matrix cell (or, for `Configuration`,
/// fatal to the whole invocation).
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Raised before any process is spawned, from the compatibility table.
    #[error("incompatible pairing: {reason}")]
    IncompatiblePairing { reason: String },

    #[error("scenario {name} failed: {detail}")]
    Scenario { name: String, detail: String },

    /// The server process died unexpectedly mid-scenario.
    #[error("harness crash: {detail}")]
    HarnessCrash { detail: String },

    #[error("cell exceeded the suite timeout")]
    SuiteTimeout,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Ca(#[from] CaError),
}

impl MatrixError {
    /// Taxonomy kind shown in the report.
    pub fn kind(&self) -> String {
        match self {
            MatrixError::Configuration(_) => "configuration".to_string(),
            MatrixError::IncompatiblePairing { .. } => "incompatible_pairing".to_string(),
            MatrixError::Scenario { .. } => "scenario_failure".to_string(),
            MatrixError::HarnessCrash { .. } => "harness_crash".to_string(),
            MatrixError::SuiteTimeout => "suite_timeout".to_string(),
            MatrixError::Ca(CaError::UnsupportedAlgorithm { .. }) => {
                "cert_generation/unsupported".to_string()
            }
            MatrixError::Ca(_) => "cert_generation".to_string(),
            MatrixError::Client(client) => match client {
                ClientError::HandshakeTimeout { .. } => "handshake_timeout".to_string(),
                ClientError::ProcessExited { .. } => "harness_crash".to_string(),
                ClientError::TlsHandshake { phase, .. } => format!("tls_handshake/{phase}"),
                ClientError::KnownIncompatible { .. } => "incompatible_pairing".to_string(),
                ClientError::NotFound { .. } => "not_found".to_string(),
                ClientError::Kv(_) => "kv_service".to_string(),
                ClientError::CallTimeout(_) | ClientError::Rpc(_) => "rpc".to_string(),
                ClientError::Configuration(_) => "configuration".to_string(),
                ClientError::Ca(_) => "cert_generation".to_string(),
                ClientError::Io(_) => "io".to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, MatrixError>;
