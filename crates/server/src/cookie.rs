//! Launch-cookie validation and the server lifecycle.

use tracing::debug;

use crosswire_wire_protocol::HandshakeConfig;

use crate::error::{Result, ServerError};

/// Lifecycle of one server process.
///
/// A cookie mismatch jumps straight from `AwaitingCookieCheck` to
/// `Terminated`; a serving server reaches `Terminated` on a shutdown signal
/// or a fatal serve error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    AwaitingCookieCheck,
    AwaitingHandshakeEmit,
    Serving,
    Terminated,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::NotStarted => "not-started",
            ServerState::AwaitingCookieCheck => "awaiting-cookie-check",
            ServerState::AwaitingHandshakeEmit => "awaiting-handshake-emit",
            ServerState::Serving => "serving",
            ServerState::Terminated => "terminated",
        }
    }
}

/// Check the launch cookie against the process environment.
///
/// Called before the listener is bound; on failure the caller must exit
/// non-zero and nothing may be written to stdout.
pub fn check_cookie(config: &HandshakeConfig) -> Result<()> {
    if config.cookie_matches() {
        debug!(cookie_key = %config.cookie_key, "launch cookie accepted");
        Ok(())
    } else {
        Err(ServerError::CookieValidation {
            cookie_key: config.cookie_key.clone(),
        })
    }
}
