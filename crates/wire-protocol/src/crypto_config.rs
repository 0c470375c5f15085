//! TLS key-generation policies.
//!
//! A [`CryptoConfig`] identifies how key material for a test cell is
//! generated: RSA at a given modulus size, or ECDSA on a named curve. The
//! canonical id (`rsa-2048`, `ec-p256`, ...) is the cache key for certificate
//! bundles and the crypto column of the compatibility matrix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Elliptic curves supported for ECDSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    /// Canonical short name used in config ids.
    pub fn short_name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "p256",
            EcCurve::P384 => "p384",
            EcCurve::P521 => "p521",
        }
    }

    /// SECG name as used by CLI/environment selectors (`secp256r1`, ...).
    pub fn secg_name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "secp256r1",
            EcCurve::P384 => "secp384r1",
            EcCurve::P521 => "secp521r1",
        }
    }
}

impl FromStr for EcCurve {
    type Err = CryptoConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p256" | "p-256" | "secp256r1" | "prime256v1" => Ok(EcCurve::P256),
            "p384" | "p-384" | "secp384r1" => Ok(EcCurve::P384),
            "p521" | "p-521" | "secp521r1" => Ok(EcCurve::P521),
            other => Err(CryptoConfigError::UnknownCurve(other.to_string())),
        }
    }
}

/// Key-generation algorithm plus its size or curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Rsa { bits: u32 },
    Ecdsa { curve: EcCurve },
}

/// Immutable value identifying a TLS key-generation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub algorithm: KeyAlgorithm,
}

impl CryptoConfig {
    pub const RSA_2048: CryptoConfig = CryptoConfig {
        algorithm: KeyAlgorithm::Rsa { bits: 2048 },
    };
    pub const RSA_4096: CryptoConfig = CryptoConfig {
        algorithm: KeyAlgorithm::Rsa { bits: 4096 },
    };
    pub const EC_P256: CryptoConfig = CryptoConfig {
        algorithm: KeyAlgorithm::Ecdsa {
            curve: EcCurve::P256,
        },
    };
    pub const EC_P384: CryptoConfig = CryptoConfig {
        algorithm: KeyAlgorithm::Ecdsa {
            curve: EcCurve::P384,
        },
    };
    pub const EC_P521: CryptoConfig = CryptoConfig {
        algorithm: KeyAlgorithm::Ecdsa {
            curve: EcCurve::P521,
        },
    };

    /// Every policy the harness knows how to exercise.
    pub fn all() -> &'static [CryptoConfig] {
        &[
            CryptoConfig::RSA_2048,
            CryptoConfig::RSA_4096,
            CryptoConfig::EC_P256,
            CryptoConfig::EC_P384,
            CryptoConfig::EC_P521,
        ]
    }

    /// Canonical identifier, used as the bundle cache key and in the matrix.
    pub fn id(&self) -> String {
        match self.algorithm {
            KeyAlgorithm::Rsa { bits } => format!("rsa-{bits}"),
            KeyAlgorithm::Ecdsa { curve } => format!("ec-{}", curve.short_name()),
        }
    }

    /// Build a config from CLI/environment selectors: a key type plus either
    /// a modulus size (RSA) or a named curve (EC).
    pub fn from_selectors(
        key_type: &str,
        bits: Option<u32>,
        curve: Option<&str>,
    ) -> Result<Self, CryptoConfigError> {
        match key_type.to_ascii_lowercase().as_str() {
            "rsa" => {
                let bits = bits.unwrap_or(2048);
                if bits != 2048 && bits != 4096 {
                    return Err(CryptoConfigError::UnsupportedRsaSize(bits));
                }
                Ok(CryptoConfig {
                    algorithm: KeyAlgorithm::Rsa { bits },
                })
            }
            "ec" | "ecdsa" => {
                let curve = curve.unwrap_or("secp256r1").parse()?;
                Ok(CryptoConfig {
                    algorithm: KeyAlgorithm::Ecdsa { curve },
                })
            }
            other => Err(CryptoConfigError::UnknownKeyType(other.to_string())),
        }
    }
}

impl fmt::Display for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for CryptoConfig {
    type Err = CryptoConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa-2048" => Ok(CryptoConfig::RSA_2048),
            "rsa-4096" => Ok(CryptoConfig::RSA_4096),
            "ec-p256" => Ok(CryptoConfig::EC_P256),
            "ec-p384" => Ok(CryptoConfig::EC_P384),
            "ec-p521" => Ok(CryptoConfig::EC_P521),
            other => Err(CryptoConfigError::UnknownConfigId(other.to_string())),
        }
    }
}

/// Errors from parsing crypto selectors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoConfigError {
    #[error("unknown crypto config id: {0}")]
    UnknownConfigId(String),

    #[error("unknown key type: {0}")]
    UnknownKeyType(String),

    #[error("unknown named curve: {0}")]
    UnknownCurve(String),

    #[error("unsupported RSA modulus size: {0} (expected 2048 or 4096)")]
    UnsupportedRsaSize(u32),
}
