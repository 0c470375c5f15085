use thiserror::Error;

use crosswire_ca::CaError;

/// Errors fatal to a server invocation.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad flags or unreadable files; fatal before anything starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The launch cookie was missing or wrong. The process must exit
    /// non-zero without emitting a handshake line.
    #[error("cookie validation failed: environment variable {cookie_key} is missing or does not match")]
    CookieValidation { cookie_key: String },

    #[error("certificate error: {0}")]
    Ca(#[from] CaError),

    #[error("TLS setup error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
