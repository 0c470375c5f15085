//! The single-line startup handshake.
//!
//! A server process, once its cookie check passed and its listener is bound,
//! writes exactly one newline-terminated ASCII line to stdout:
//!
//! ```text
//! core_version|protocol_version|network|address|protocol|cert_b64
//! ```
//!
//! The launching client scans stdout line by line and treats anything that
//! does not split into exactly six fields as ordinary log output. `cert_b64`
//! is the base64 DER of the server's leaf certificate when automatic mTLS is
//! active, and empty otherwise.

use base64::prelude::{Engine, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Transport family a server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Tcp,
    LocalSocket,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::LocalSocket => "local-socket",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "local-socket" => Ok(Network::LocalSocket),
            _ => Err(()),
        }
    }
}

/// Resolved server location, derived from a [`HandshakeLine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub network: Network,
    /// `host:port` for tcp, a filesystem path for local-socket.
    pub address: String,
}

/// The parsed six-field startup line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeLine {
    pub core_version: u32,
    pub protocol_version: u32,
    pub network: Network,
    pub address: String,
    pub protocol: String,
    /// base64 DER of the server leaf certificate; empty unless auto mTLS.
    pub cert_b64: String,
}

impl HandshakeLine {
    /// Parse one line of server output.
    ///
    /// Returns `None` for anything that is not a well-formed handshake:
    /// wrong field count, non-numeric versions, or an unknown network. Such
    /// lines are log output, not errors.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 6 {
            return None;
        }
        let core_version = fields[0].parse().ok()?;
        let protocol_version = fields[1].parse().ok()?;
        let network = fields[2].parse().ok()?;
        if fields[3].is_empty() || fields[4].is_empty() {
            return None;
        }
        Some(Self {
            core_version,
            protocol_version,
            network,
            address: fields[3].to_string(),
            protocol: fields[4].to_string(),
            cert_b64: fields[5].to_string(),
        })
    }

    /// The endpoint this handshake advertises.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            network: self.network,
            address: self.address.clone(),
        }
    }

    /// Decode the advertised server certificate, if any.
    pub fn server_cert_der(&self) -> Option<Vec<u8>> {
        if self.cert_b64.is_empty() {
            return None;
        }
        BASE64_STANDARD.decode(&self.cert_b64).ok()
    }

    /// SHA-256 fingerprint of the advertised certificate, for pinning.
    pub fn server_cert_fingerprint(&self) -> Option<CertFingerprint> {
        self.server_cert_der()
            .map(|der| CertFingerprint::of_der(&der))
    }
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.core_version,
            self.protocol_version,
            self.network,
            self.address,
            self.protocol,
            self.cert_b64
        )
    }
}

/// Encode a DER certificate for the `cert_b64` field.
pub fn encode_cert_field(der: &[u8]) -> String {
    BASE64_STANDARD.encode(der)
}

/// TLS channel mode between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plaintext channel, no certificate exchange.
    Disabled,
    /// Both ends derive certificates from the same crypto config; the client
    /// pins the fingerprint advertised in the handshake line.
    Auto,
    /// Both ends load caller-supplied certificate and key files.
    Manual,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Disabled => "disabled",
            TlsMode::Auto => "auto",
            TlsMode::Manual => "manual",
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(TlsMode::Disabled),
            "auto" => Ok(TlsMode::Auto),
            "manual" => Ok(TlsMode::Manual),
            other => Err(format!("unknown TLS mode: {other}")),
        }
    }
}

/// SHA-256 fingerprint of a DER-encoded certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertFingerprint(pub [u8; 32]);

impl CertFingerprint {
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        Self(digest.into())
    }
}

impl fmt::Display for CertFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
