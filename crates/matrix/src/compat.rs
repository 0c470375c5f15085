//! The compatibility knowledge base.
//!
//! Pure data: a static table of known-(in)compatible runtime/crypto
//! combinations, consulted before any process is spawned. Growing the
//! supported set means adding rows here, never touching establisher or
//! orchestrator logic. Validation is advisory; callers may force an attempt
//! with an explicit override.

use crosswire_wire_protocol::CryptoConfig;

/// Wildcard matching any runtime or crypto id.
pub const ANY: &str = "*";

/// One row of the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityRule {
    pub client_runtime: &'static str,
    pub server_runtime: &'static str,
    pub crypto_id: &'static str,
    pub supported: bool,
    pub reason: &'static str,
}

/// Known-(in)compatible combinations, first match wins.
///
/// Pairings without a matching row are assumed attemptable: absence of
/// knowledge is not evidence of incompatibility.
pub const COMPATIBILITY_RULES: &[CompatibilityRule] = &[
    // The legacy Go runtime links a TLS stack without P-521 support; both
    // directions fail during cipher negotiation.
    CompatibilityRule {
        client_runtime: "go-legacy",
        server_runtime: ANY,
        crypto_id: "ec-p521",
        supported: false,
        reason: "go-legacy TLS stack does not implement secp521r1",
    },
    CompatibilityRule {
        client_runtime: ANY,
        server_runtime: "go-legacy",
        crypto_id: "ec-p521",
        supported: false,
        reason: "go-legacy TLS stack does not implement secp521r1",
    },
    // The python harness links an OpenSSL build that rejects P-521 client
    // certificates during client auth.
    CompatibilityRule {
        client_runtime: ANY,
        server_runtime: "python",
        crypto_id: "ec-p521",
        supported: false,
        reason: "python runtime's OpenSSL build rejects secp521r1 client certificates",
    },
    // RSA-4096 handshakes against go-legacy exceed its hard handshake
    // timeout on slow builders; recorded as unsupported after repeated CI
    // flakes.
    CompatibilityRule {
        client_runtime: "go-legacy",
        server_runtime: ANY,
        crypto_id: "rsa-4096",
        supported: false,
        reason: "go-legacy handshake timer expires on RSA-4096 key exchange",
    },
    // Documented-good combinations, kept as explicit rows so the report can
    // cite a reason for expected successes too.
    CompatibilityRule {
        client_runtime: "rust",
        server_runtime: "rust",
        crypto_id: ANY,
        supported: true,
        reason: "native pairing, exercised in every CI run",
    },
    CompatibilityRule {
        client_runtime: "rust",
        server_runtime: "go",
        crypto_id: "ec-p256",
        supported: true,
        reason: "verified against the current go harness",
    },
];

/// Outcome of a pre-flight lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub supported: bool,
    pub reason: Option<String>,
    /// Crypto config ids for the same pairing that are not marked broken.
    pub suggested_alternatives: Vec<String>,
}

fn matches(pattern: &str, value: &str) -> bool {
    pattern == ANY || pattern == value
}

fn lookup(client: &str, server: &str, crypto_id: &str) -> Option<&'static CompatibilityRule> {
    COMPATIBILITY_RULES.iter().find(|rule| {
        matches(rule.client_runtime, client)
            && matches(rule.server_runtime, server)
            && matches(rule.crypto_id, crypto_id)
    })
}

/// Pure lookup of a `(client, server, crypto)` triple. Idempotent.
pub fn validate(client: &str, server: &str, crypto: &CryptoConfig) -> Validation {
    let crypto_id = crypto.id();
    match lookup(client, server, &crypto_id) {
        Some(rule) => {
            let suggested_alternatives = if rule.supported {
                Vec::new()
            } else {
                CryptoConfig::all()
                    .iter()
                    .map(|alternative| alternative.id())
                    .filter(|id| {
                        *id != crypto_id
                            && lookup(client, server, id).map(|r| r.supported).unwrap_or(true)
                    })
                    .collect()
            };
            Validation {
                supported: rule.supported,
                reason: Some(rule.reason.to_string()),
                suggested_alternatives,
            }
        }
        None => Validation {
            supported: true,
            reason: None,
            suggested_alternatives: Vec::new(),
        },
    }
}
