//! Payload classification and metadata enrichment.
//!
//! Whether a value is enrichable is decided once, by attempting to parse it
//! as a JSON object. The result is an explicit tag ([`Payload`]); enrichment
//! is then a pure function over that tag. Opaque payloads always persist
//! byte-identical.

use serde_json::{Map, Value};

use crosswire_wire_protocol::{EntryMetadata, METADATA_FIELD};

/// Result of classifying an incoming value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The value parsed as a JSON object.
    Structured(Map<String, Value>),
    /// Anything else: binary, scalars, arrays, invalid UTF-8.
    Opaque(Vec<u8>),
}

impl Payload {
    /// Classify raw bytes. Only a top-level JSON object counts as
    /// structured; arrays and scalars stay opaque so they round-trip
    /// untouched.
    pub fn classify(bytes: &[u8]) -> Payload {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Payload::Structured(map),
            _ => Payload::Opaque(bytes.to_vec()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }
}

/// Attach metadata to a structured payload; pass opaque payloads through.
///
/// A user-supplied field named `_probe_metadata` is overwritten.
pub fn enrich(payload: Payload, metadata: &EntryMetadata) -> Vec<u8> {
    match payload {
        Payload::Structured(mut map) => {
            let meta_value =
                serde_json::to_value(metadata).expect("EntryMetadata serializes to JSON");
            map.insert(METADATA_FIELD.to_string(), meta_value);
            serde_json::to_vec(&Value::Object(map)).expect("JSON object serializes")
        }
        Payload::Opaque(bytes) => bytes,
    }
}
