use thiserror::Error;

/// Errors from certificate issuance.
#[derive(Debug, Error)]
pub enum CaError {
    /// The executing environment cannot generate or sign with the requested
    /// primitive. A capability mismatch, not a crash.
    #[error("crypto config {config_id} is not supported by this environment: {detail}")]
    UnsupportedAlgorithm { config_id: String, detail: String },

    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate parsing error: {0}")]
    Parse(String),
}

/// Result type for CA operations.
pub type Result<T> = std::result::Result<T, CaError>;
