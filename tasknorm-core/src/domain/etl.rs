//! ETL provenance envelope
//!
//! Every emitted record carries exactly one envelope linking it back to
//! the source record it was derived from. The destination key is the
//! dotted chain of envelope ids, outermost source first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance envelope attached to every emitted record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlEnvelope {
    /// Per-line sequence number within the source batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Parent ETL pointer, kept as the raw source envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineMetadata>,
    /// Set on placeholder records, e.g. `"not found"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EtlEnvelope {
    /// A `join`-type envelope for line `id` of the batch described by `source`
    pub fn join(id: u64, source: Option<Value>) -> Self {
        Self {
            id: Some(id),
            source,
            kind: Some("join".to_string()),
            timestamp: Some(Utc::now()),
            machine: Some(MachineMetadata::capture()),
            error: None,
        }
    }

    /// Destination key derived from the envelope chain
    pub fn key(&self) -> String {
        let id = self.id.map(|n| n.to_string()).unwrap_or_default();
        match &self.source {
            Some(source) => format!("{}.{}", value_key(source), id),
            None => id,
        }
    }
}

/// Key of a raw envelope value, walking the `source` chain recursively
pub fn value_key(etl: &Value) -> String {
    let id = match etl.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    match etl.get("source") {
        Some(source) if source.is_object() => format!("{}.{}", value_key(source), id),
        _ => id,
    }
}

/// Facts about the machine that produced a record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub os: String,
    pub arch: String,
    pub pid: u32,
}

impl MachineMetadata {
    /// Captures metadata for the current process
    pub fn capture() -> Self {
        Self {
            name: std::env::var("HOSTNAME").ok(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pid: std::process::id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_walks_source_chain() {
        let source = json!({"id": 7, "source": {"id": "tc"}});
        let envelope = EtlEnvelope {
            id: Some(3),
            source: Some(source),
            ..Default::default()
        };
        assert_eq!(envelope.key(), "tc.7.3");
    }

    #[test]
    fn test_key_without_source() {
        let envelope = EtlEnvelope {
            id: Some(12),
            ..Default::default()
        };
        assert_eq!(envelope.key(), "12");
    }
}
