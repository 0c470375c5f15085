use thiserror::Error;

use crosswire_ca::CaError;
use crosswire_wire_protocol::KvError;

/// Phase of the TLS handshake a failure is attributed to, so cross-runtime
/// incompatibilities are diagnosable rather than opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// The server rejected our client certificate.
    ClientAuth,
    /// We rejected the server's certificate (chain or pinned fingerprint).
    ServerAuth,
    /// The peers could not agree on protocol parameters (cipher suites,
    /// named groups, signature schemes).
    CipherNegotiation,
}

impl HandshakePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakePhase::ClientAuth => "client_auth",
            HandshakePhase::ServerAuth => "server_auth",
            HandshakePhase::CipherNegotiation => "cipher_negotiation",
        }
    }
}

impl std::fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No handshake line appeared within the startup timeout. Carries the
    /// process output captured so far; this is the documented failure class
    /// when a client targets a server from an incompatible runtime family.
    #[error("no handshake line within {timeout_secs}s; captured output:\n{output}")]
    HandshakeTimeout { timeout_secs: u64, output: String },

    /// The server process exited before producing a handshake line.
    #[error("server process exited with {code:?} before handshake; captured output:\n{output}")]
    ProcessExited { code: Option<i32>, output: String },

    #[error("TLS handshake failed in phase {phase}: {detail}")]
    TlsHandshake {
        phase: HandshakePhase,
        detail: String,
    },

    /// A failure on a pairing the compatibility matrix already marks
    /// unsupported. Not worth retrying.
    #[error("known incompatible pairing ({reason}): {source}")]
    KnownIncompatible {
        reason: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("KV service error: {0}")]
    Kv(#[from] KvError),

    #[error("RPC transport error: {0}")]
    Rpc(#[from] tarpc::client::RpcError),

    #[error("RPC call timed out after {0:?}")]
    CallTimeout(std::time::Duration),

    #[error("certificate error: {0}")]
    Ca(#[from] CaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Whether the caller may reasonably retry the operation. Known
    /// incompatibilities and configuration mistakes are permanent.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ClientError::KnownIncompatible { .. } | ClientError::Configuration(_)
        )
    }
}
