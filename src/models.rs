use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// A stored chunk of ingested security documentation (spec section 3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub source: String,
    pub source_id: String,
    pub version: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub file_hash: Option<String>,
    pub chunk: Option<u32>,
    pub total: Option<u32>,
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Deterministic id derivation: `source_id` + `version` + content hash.
/// Stable across calls (testable property #2 in spec section 8).
pub fn derive_document_id(source_id: &str, version: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let mut id_hasher = Sha256::new();
    id_hasher.update(source_id.as_bytes());
    id_hasher.update(b":");
    id_hasher.update(version.as_bytes());
    id_hasher.update(b":");
    id_hasher.update(content_hash.as_bytes());
    format!("{:x}", id_hasher.finalize())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parallel-array result shape returned by `Repository::query`.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    pub documents: Vec<String>,
    pub metadatas: Vec<DocumentMetadata>,
    pub distances: Vec<f32>,
    pub ids: Vec<String>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RepositoryStats {
    pub total: usize,
    pub active: usize,
    pub unique_sources: usize,
    pub unique_source_ids: usize,
    pub tags_distribution: HashMap<String, usize>,
    pub version_distribution: HashMap<String, usize>,
}

/// L1/L2 cache entry (spec section 3). Embeddings only ever live in L1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: String,
    pub timestamp: i64,
    pub original_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Fixed attack-pattern taxonomy (spec section 3 and design note on
/// ordering). Order of this slice is the tie-break order for keyword
/// matching in the alert summarizer and must not be reshuffled.
pub const ATTACK_PATTERN_ORDER: &[&str] = &[
    "reconnaissance",
    "brute_force",
    "lateral_movement",
    "exfiltration",
    "network_attack",
    "malware",
    "web_attack",
    "blocked_traffic",
    "suspicious_traffic",
    "connection",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub source_ip: Option<String>,
    pub agent_name: Option<String>,
    pub severity: Severity,
    pub probability: f32,
    pub ml_input: String,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertGroup {
    pub source_ip: String,
    pub pattern: String,
    pub severity: Severity,
    pub alert_count: usize,
    pub avg_probability: f32,
    pub agents: Vec<String>,
    pub sample_alerts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_across_calls() {
        let a = derive_document_id("src-1", "v1", "hello world");
        let b = derive_document_id("src-1", "v1", "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn document_id_changes_with_content() {
        let a = derive_document_id("src-1", "v1", "hello world");
        let b = derive_document_id("src-1", "v1", "goodbye world");
        assert_ne!(a, b);
    }

    #[test]
    fn document_id_changes_with_version() {
        let a = derive_document_id("src-1", "v1", "hello world");
        let b = derive_document_id("src-1", "v2", "hello world");
        assert_ne!(a, b);
    }

    #[test]
    fn severity_round_trips_through_str() {
        assert_eq!(Severity::from_str("warning"), Some(Severity::Warning));
        assert_eq!(Severity::Error.as_str(), "ERROR");
    }

    #[test]
    fn attack_pattern_order_matches_spec_priority() {
        assert_eq!(ATTACK_PATTERN_ORDER[0], "reconnaissance");
        assert_eq!(ATTACK_PATTERN_ORDER[1], "brute_force");
        assert_eq!(*ATTACK_PATTERN_ORDER.last().unwrap(), "connection");
    }
}
