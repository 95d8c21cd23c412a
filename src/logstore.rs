//! Log-store adapter contract (spec section 6), the out-of-scope
//! collaborator `AlertSummarizer` queries. Grounded on
//! `alert_summarization_service.py::_query_alerts`'s Elasticsearch
//! query-DSL shape, generalized behind a trait the way `kvstore.rs`
//! generalizes the teacher's direct `redis::Client` usage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;

use serde_json::json;

/// One raw log record as returned by the adapter (spec section 6): at
/// least `@timestamp`, `ml.prediction.{predicted_value,
/// prediction_probability}`, optional `source.ip`, `agent.name`,
/// `ml_input`, `message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub ml: MlPrediction,
    pub source: Option<SourceField>,
    pub agent: Option<AgentField>,
    pub ml_input: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MlPrediction {
    pub prediction: Prediction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_value: String,
    pub prediction_probability: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceField {
    pub ip: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentField {
    pub name: Option<String>,
}

/// `search(index_pattern, query_dsl, size, sort)` (spec section 6). The
/// query DSL is passed through opaquely — building it is the caller's
/// job (`alerts.rs`), matching `_query_alerts`'s `must_clauses` list.
#[async_trait]
pub trait LogStoreAdapter: Send + Sync {
    async fn search(
        &self,
        index_pattern: &str,
        query_dsl: serde_json::Value,
        size: usize,
        sort: serde_json::Value,
    ) -> Result<Vec<LogRecord>, Box<dyn Error + Send + Sync>>;
}

/// Builds the `must`-clause query DSL `_query_alerts` sends: time range,
/// `ml.prediction.predicted_value` in `{INFO,WARNING,ERROR}`, probability
/// floor, non-empty `ml_input`, and an optional `source.ip` filter.
pub fn build_alert_query_dsl(start: DateTime<Utc>, end: DateTime<Utc>, min_probability: f32, source_ip: Option<&str>) -> serde_json::Value {
    let mut must = vec![
        serde_json::json!({"range": {"@timestamp": {"gte": start.to_rfc3339(), "lte": end.to_rfc3339()}}}),
        serde_json::json!({"terms": {"ml.prediction.predicted_value": ["INFO", "WARNING", "ERROR"]}}),
        serde_json::json!({"range": {"ml.prediction.prediction_probability": {"gte": min_probability}}}),
        serde_json::json!({"exists": {"field": "ml_input"}}),
        serde_json::json!({"bool": {"must_not": {"term": {"ml_input.keyword": ""}}}}),
    ];

    if let Some(ip) = source_ip {
        must.push(serde_json::json!({"term": {"source.ip": ip}}));
    }

    serde_json::json!({"bool": {"must": must}})
}

/// Elasticsearch/OpenSearch-compatible `_search` adapter, the teacher's
/// plain `reqwest::Client` style applied to the log store instead of
/// Chroma or VirusTotal.
pub struct ElasticsearchLogStore {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticsearchLogStore {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: LogRecord,
}

#[async_trait]
impl LogStoreAdapter for ElasticsearchLogStore {
    async fn search(
        &self,
        index_pattern: &str,
        query_dsl: serde_json::Value,
        size: usize,
        sort: serde_json::Value,
    ) -> Result<Vec<LogRecord>, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/{}/_search", self.base_url, index_pattern);
        let body = json!({ "query": query_dsl, "size": size, "sort": sort });

        let resp = self.client.post(&url).json(&body).send().await?.error_for_status()?;
        let parsed: SearchResponse = resp.json().await?;
        Ok(parsed.hits.hits.into_iter().map(|h| h.source).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_dsl_includes_source_ip_filter_when_given() {
        let start = Utc::now();
        let end = Utc::now();
        let dsl = build_alert_query_dsl(start, end, 0.5, Some("10.0.0.5"));
        let must = dsl["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 6);
    }

    #[test]
    fn query_dsl_omits_source_ip_clause_when_absent() {
        let start = Utc::now();
        let end = Utc::now();
        let dsl = build_alert_query_dsl(start, end, 0.5, None);
        let must = dsl["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 5);
    }
}
