//! Pluggable IOC-analyzer handler registry (spec section 4.6), grounded
//! on `app/services/analyzers/__init__.py`'s `BaseAnalyzerHandler` and
//! `register_analyzer`/`get_handler` pair.

pub mod generic;
pub mod misp;
pub mod virustotal;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Verdict a handler assigns to a report (spec section 4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Clean,
    Suspicious,
    Malicious,
    Unknown,
}

pub trait AnalyzerHandler: Send + Sync {
    fn display_name(&self) -> &'static str;
    fn priority(&self) -> i32;

    /// Compact key facts extracted from a raw report, kept minimal for
    /// token budget when surfaced to the LLM.
    fn extract_stats(&self, report: &Value) -> Value;

    /// `{analyzer, type, verdict, ...}` summary (~50-100 tokens), or
    /// `None` when the report carries nothing to summarize.
    fn summarize(&self, analyzer: &Value) -> Option<Value>;

    fn get_risk_score(&self, report: &Value) -> i32;

    /// Default: risk score at or above 50 (spec section 4.6).
    fn is_malicious(&self, report: &Value) -> bool {
        self.get_risk_score(report) >= 50
    }
}

pub struct AnalyzerRegistry {
    handlers: HashMap<String, Arc<dyn AnalyzerHandler>>,
}

impl AnalyzerRegistry {
    /// Registers the generic fallback plus the concrete handlers spec
    /// section 4.6 requires (VirusTotal, MISP).
    pub fn with_defaults() -> Self {
        let mut registry = Self { handlers: HashMap::new() };
        registry.register("generic", Arc::new(generic::GenericHandler));
        registry.register("virustotal", Arc::new(virustotal::VirusTotalHandler));
        registry.register("misp", Arc::new(misp::MispHandler));
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn AnalyzerHandler>) {
        self.handlers.insert(name.to_lowercase(), handler);
    }

    /// Exact match first, then substring match against registered keys
    /// (`key` found anywhere inside the lowercased analyzer name),
    /// matching `get_handler`'s lookup order. `HashMap` iteration order
    /// is nondeterministic, so the substring pass breaks ties by
    /// descending `priority()` (then by key, for a total order) rather
    /// than by map iteration order.
    pub fn get(&self, analyzer_name: &str) -> Option<Arc<dyn AnalyzerHandler>> {
        let name_lower = analyzer_name.to_lowercase();

        if let Some(h) = self.handlers.get(&name_lower) {
            return Some(h.clone());
        }

        self.handlers
            .iter()
            .filter(|(key, _)| name_lower.contains(key.as_str()))
            .max_by(|(key_a, handler_a), (key_b, handler_b)| {
                handler_a.priority().cmp(&handler_b.priority()).then_with(|| key_a.cmp(key_b))
            })
            .map(|(_, h)| h.clone())
    }

    /// Same lookup, but falls back to the generic handler instead of
    /// `None` — the shape every caller in the enrichment path actually
    /// wants, since the generic handler is always registered.
    pub fn get_or_generic(&self, analyzer_name: &str) -> Arc<dyn AnalyzerHandler> {
        self.get(analyzer_name)
            .unwrap_or_else(|| self.handlers.get("generic").expect("generic handler always registered").clone())
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_match_wins_over_substring() {
        let registry = AnalyzerRegistry::with_defaults();
        let handler = registry.get("virustotal").unwrap();
        assert_eq!(handler.display_name(), "VirusTotal");
    }

    #[test]
    fn substring_match_finds_handler_in_compound_name() {
        let registry = AnalyzerRegistry::with_defaults();
        let handler = registry.get("VirusTotal_v3_Get").unwrap();
        assert_eq!(handler.display_name(), "VirusTotal");
    }

    #[test]
    fn unknown_analyzer_falls_back_to_generic() {
        let registry = AnalyzerRegistry::with_defaults();
        assert!(registry.get("shodan").is_none());
        assert_eq!(registry.get_or_generic("shodan").display_name(), "Generic Analyzer");
    }

    #[test]
    fn substring_match_is_deterministic_when_multiple_keys_match() {
        let registry = AnalyzerRegistry::with_defaults();
        // Contains both "misp" (priority 90) and "virustotal" (priority 100) as
        // substrings; the higher-priority handler must win every time, not
        // whichever the HashMap happens to iterate first.
        for _ in 0..20 {
            let handler = registry.get("misp_virustotal_combo").unwrap();
            assert_eq!(handler.display_name(), "VirusTotal");
        }
    }

    #[test]
    fn generic_handler_extracts_common_fields() {
        let registry = AnalyzerRegistry::with_defaults();
        let handler = registry.get_or_generic("unknown_thing");
        let stats = handler.extract_stats(&json!({"malicious": true, "score": 80}));
        assert_eq!(stats["malicious"], json!(true));
    }
}
