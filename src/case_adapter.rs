//! HTTP case-management adapter (spec section 4.8 steps 1, 4, 5),
//! grounded on the teacher's `memory.rs` Chroma client for request shape
//! and `src/repository.rs`'s `ChromaRepository` for how a thin REST
//! wrapper around an external store is structured in this crate.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::enrichment::{CaseAdapter, IocDescription, IocReport};
use crate::error::AppError;

/// Talks to a case-management backend (IntelOwl-shaped primary source,
/// MISP-shaped fallback) over a REST API authenticated with a bearer
/// token, the way `ChromaRepository` talks to Chroma.
pub struct HttpCaseAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCaseAdapter {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, api_key }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

#[derive(Deserialize)]
struct ReportResponse {
    ioc_value: String,
    raw_data: serde_json::Value,
    html_report: Option<String>,
}

#[derive(Deserialize)]
struct DescriptionResponse {
    description: Option<String>,
    tags: Option<Vec<String>>,
}

#[async_trait]
impl CaseAdapter for HttpCaseAdapter {
    async fn primary_report(&self, case_id: i64, ioc_id: i64) -> Result<Option<IocReport>, AppError> {
        let url = format!("{}/api/cases/{case_id}/iocs/{ioc_id}/report", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("primary report fetch failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(|e| AppError::ApiError(e.to_string()))?;
        let parsed: ReportResponse = resp.json().await.map_err(|e| AppError::ApiError(format!("bad report body: {e}")))?;
        Ok(Some(IocReport { ioc_value: parsed.ioc_value, raw_data: parsed.raw_data, html_report: parsed.html_report }))
    }

    async fn fallback_report(&self, case_id: i64, ioc_id: i64) -> Result<Option<IocReport>, AppError> {
        let url = format!("{}/api/cases/{case_id}/iocs/{ioc_id}/misp_report", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("fallback report fetch failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(|e| AppError::ApiError(e.to_string()))?;
        let parsed: ReportResponse = resp.json().await.map_err(|e| AppError::ApiError(format!("bad report body: {e}")))?;
        Ok(Some(IocReport { ioc_value: parsed.ioc_value, raw_data: parsed.raw_data, html_report: parsed.html_report }))
    }

    async fn add_comment(&self, case_id: i64, ioc_id: i64, comment: &str) -> Result<(), AppError> {
        let url = format!("{}/api/cases/{case_id}/iocs/{ioc_id}/comments", self.base_url);
        self.authed(self.client.post(&url))
            .json(&json!({ "comment": comment }))
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("add_comment failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::ApiError(e.to_string()))?;
        Ok(())
    }

    async fn get_description(&self, case_id: i64, ioc_id: i64) -> Result<IocDescription, AppError> {
        let url = format!("{}/api/cases/{case_id}/iocs/{ioc_id}", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("get_description failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::ApiError(e.to_string()))?;
        let parsed: DescriptionResponse =
            resp.json().await.map_err(|e| AppError::ApiError(format!("bad ioc body: {e}")))?;
        Ok(IocDescription { description: parsed.description.unwrap_or_default(), tags: parsed.tags.unwrap_or_default() })
    }

    async fn update_ioc(&self, case_id: i64, ioc_id: i64, description: &str, tags: &[String]) -> Result<(), AppError> {
        let url = format!("{}/api/cases/{case_id}/iocs/{ioc_id}", self.base_url);
        self.authed(self.client.patch(&url))
            .json(&json!({ "description": description, "tags": tags }))
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("update_ioc failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::ApiError(e.to_string()))?;
        Ok(())
    }
}
