//! Protocol version constants and the shared-secret cookie contract.

use serde::{Deserialize, Serialize};

/// Version of the handshake itself (the shape of the startup line).
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Version of the KV probe service carried over the channel.
pub const KV_PROTOCOL_VERSION: u32 = 1;

/// Identifier of the RPC protocol advertised in the handshake line.
pub const RPC_PROTOCOL: &str = "tarpc-postcard";

/// Default name of the cookie environment variable.
pub const DEFAULT_COOKIE_KEY: &str = "CROSSWIRE_PLUGIN_COOKIE";

/// Default expected cookie value.
pub const DEFAULT_COOKIE_VALUE: &str = "c5e1a2b7-probe-harness";

/// Environment variable overriding the KV storage root.
pub const STORAGE_ROOT_ENV: &str = "CROSSWIRE_KV_ROOT";

/// Environment variable selecting the TLS mode (`disabled`, `auto`, `manual`).
pub const TLS_MODE_ENV: &str = "CROSSWIRE_TLS_MODE";

/// Environment variable selecting the TLS key type (`rsa`, `ec`).
pub const TLS_KEY_TYPE_ENV: &str = "CROSSWIRE_TLS_KEY_TYPE";

/// Environment variable selecting the named curve for EC keys.
pub const TLS_CURVE_ENV: &str = "CROSSWIRE_TLS_CURVE";

/// Environment variable selecting the RSA modulus size.
pub const TLS_RSA_BITS_ENV: &str = "CROSSWIRE_TLS_RSA_BITS";

/// Environment variable pointing a spawned server at the certificate bundle
/// directory exported by its launcher, so both ends chain to the same CA in
/// auto mode. Without it an auto-mode server issues its own bundle.
pub const AUTO_TLS_DIR_ENV: &str = "CROSSWIRE_AUTO_TLS_DIR";

/// Shared-secret cookie contract between a launching client and the server
/// process it spawns.
///
/// The server reads the environment variable named `cookie_key` and refuses
/// to start unless its value equals `cookie_value`. This confirms the process
/// was launched deliberately by a compatible parent and not by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Name of the environment variable carrying the cookie.
    pub cookie_key: String,
    /// Expected value of that variable.
    pub cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            cookie_key: DEFAULT_COOKIE_KEY.to_string(),
            cookie_value: DEFAULT_COOKIE_VALUE.to_string(),
        }
    }
}

impl HandshakeConfig {
    pub fn new(cookie_key: impl Into<String>, cookie_value: impl Into<String>) -> Self {
        Self {
            cookie_key: cookie_key.into(),
            cookie_value: cookie_value.into(),
        }
    }

    /// Check the cookie against the current process environment.
    pub fn cookie_matches(&self) -> bool {
        std::env::var(&self.cookie_key)
            .map(|value| value == self.cookie_value)
            .unwrap_or(false)
    }
}
