//! Conformance scenarios run against an established KV channel.

use serde_json::Value;
use tracing::debug;

use crosswire_client::{ClientError, KvClient};
use crosswire_wire_protocol::KvError;

use crate::error::MatrixError;

/// One functional scenario of a matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Put one key, read it back, delete it.
    BasicPutGet,
    /// Several keys are independent of each other.
    MultipleKeys,
    /// Last write wins on the same key.
    KeyOverwrite,
    /// Empty, large, binary, structured, and invalid-key payloads.
    EdgeCasePayloads,
}

impl Scenario {
    pub fn all() -> &'static [Scenario] {
        &[
            Scenario::BasicPutGet,
            Scenario::MultipleKeys,
            Scenario::KeyOverwrite,
            Scenario::EdgeCasePayloads,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::BasicPutGet => "basic-put-get",
            Scenario::MultipleKeys => "multiple-keys",
            Scenario::KeyOverwrite => "key-overwrite",
            Scenario::EdgeCasePayloads => "edge-case-payloads",
        }
    }

    /// Run the scenario. Operations execute strictly sequentially.
    pub async fn run(&self, kv: &KvClient) -> Result<(), MatrixError> {
        debug!(scenario = self.name(), "running scenario");
        match self {
            Scenario::BasicPutGet => self.basic_put_get(kv).await,
            Scenario::MultipleKeys => self.multiple_keys(kv).await,
            Scenario::KeyOverwrite => self.key_overwrite(kv).await,
            Scenario::EdgeCasePayloads => self.edge_case_payloads(kv).await,
        }
        .map_err(|e| self.wrap(e))
    }

    fn wrap(&self, err: ScenarioFailure) -> MatrixError {
        match err {
            ScenarioFailure::Client(e) => MatrixError::Client(e),
            ScenarioFailure::Check(detail) => MatrixError::Scenario {
                name: self.name().to_string(),
                detail,
            },
        }
    }

    async fn basic_put_get(&self, kv: &KvClient) -> Result<(), ScenarioFailure> {
        kv.put("greeting", b"hello".to_vec()).await?;
        let value = kv.get_required("greeting").await?;
        check(value == b"hello", || {
            format!("greeting round-trip mismatch: {value:?}")
        })?;
        kv.delete("greeting").await?;
        check(kv.get("greeting").await?.is_none(), || {
            "greeting survived delete".to_string()
        })?;
        Ok(())
    }

    async fn multiple_keys(&self, kv: &KvClient) -> Result<(), ScenarioFailure> {
        let pairs: &[(&str, &[u8])] = &[
            ("alpha", b"one"),
            ("beta", b"two"),
            ("gamma", b"three"),
        ];
        for (key, value) in pairs {
            kv.put(key, value.to_vec()).await?;
        }
        for (key, expected) in pairs {
            let value = kv.get_required(key).await?;
            check(value == *expected, || format!("{key} mismatch: {value:?}"))?;
        }
        let listed = kv.list().await?;
        for (key, _) in pairs {
            check(listed.iter().any(|k| k == key), || {
                format!("{key} missing from list: {listed:?}")
            })?;
        }
        Ok(())
    }

    async fn key_overwrite(&self, kv: &KvClient) -> Result<(), ScenarioFailure> {
        kv.put("counter", b"first".to_vec()).await?;
        kv.put("counter", b"second".to_vec()).await?;
        let value = kv.get_required("counter").await?;
        check(value == b"second", || {
            format!("overwrite lost: {value:?}")
        })?;
        Ok(())
    }

    async fn edge_case_payloads(&self, kv: &KvClient) -> Result<(), ScenarioFailure> {
        // Empty value.
        kv.put("empty", Vec::new()).await?;
        check(kv.get_required("empty").await?.is_empty(), || {
            "empty value came back non-empty".to_string()
        })?;

        // Large value (64 KiB) survives framing.
        let large = vec![0xA5u8; 64 * 1024];
        kv.put("large", large.clone()).await?;
        check(kv.get_required("large").await? == large, || {
            "large value mismatch".to_string()
        })?;

        // Binary value is byte-identical.
        let binary: Vec<u8> = (0..=255).collect();
        kv.put("binary", binary.clone()).await?;
        check(kv.get_required("binary").await? == binary, || {
            "binary value mismatch".to_string()
        })?;

        // Structured value: every original field must survive, whether or
        // not the server enriched it with a metadata sibling.
        let structured = br#"{"kind":"probe","n":7}"#.to_vec();
        kv.put("structured", structured).await?;
        let stored = kv.get_required("structured").await?;
        let value: Value = serde_json::from_slice(&stored)
            .map_err(|e| ScenarioFailure::Check(format!("structured value unparsable: {e}")))?;
        check(value["kind"] == "probe" && value["n"] == 7, || {
            format!("structured fields lost: {value}")
        })?;

        // Invalid key is rejected and creates nothing.
        match kv.put("not/a/key", b"x".to_vec()).await {
            Err(ClientError::Kv(KvError::InvalidKey { .. })) => {}
            Ok(()) => {
                return Err(ScenarioFailure::Check(
                    "invalid key was accepted".to_string(),
                ))
            }
            Err(other) => return Err(other.into()),
        }
        check(kv.get("not/a/key").await?.is_none(), || {
            "invalid key produced an entry".to_string()
        })?;

        Ok(())
    }
}

/// Scenario-internal failure: a transport/service error or a failed check.
#[derive(Debug)]
enum ScenarioFailure {
    Client(ClientError),
    Check(String),
}

impl From<ClientError> for ScenarioFailure {
    fn from(err: ClientError) -> Self {
        ScenarioFailure::Client(err)
    }
}

fn check(ok: bool, detail: impl FnOnce() -> String) -> Result<(), ScenarioFailure> {
    if ok {
        Ok(())
    } else {
        Err(ScenarioFailure::Check(detail()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_names_are_stable() {
        let names: Vec<_> = Scenario::all().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "basic-put-get",
                "multiple-keys",
                "key-overwrite",
                "edge-case-payloads"
            ]
        );
    }
}
