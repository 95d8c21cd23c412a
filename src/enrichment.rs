//! IOC enrichment orchestrator (spec section 4.8), grounded on
//! `app/routes/ioc.py`'s `/api/enrich/explain_intelowl` handler and
//! `app/services/llm_service.py`'s `explain_intelowl_results`/
//! `_determine_risk_level`/`_extract_critical_findings` trio.
//!
//! The Python original has two description-update code paths that
//! disagree: `enrich_service.py`'s `EnrichService` appends the new
//! summary unconditionally, while `app/routes/ioc.py`'s
//! `/explain_intelowl` route strips any prior `--- [SmartXDR AI
//! Analysis ... ---` section via regex before prepending. Section
//! 4.8 step 5 names the regex-strip behavior explicitly, so that is
//! what `merge_description` implements here.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::ai::provider::LLMProvider;
use crate::analyzers::AnalyzerRegistry;
use crate::error::AppError;
use crate::prompts::PromptBuilder;
use crate::rag_pipeline::RagPipeline;

/// A fetched third-party enrichment report (spec section 4.8 step 1). The
/// adapter that produces this is out-of-scope — specified only by shape.
#[derive(Clone, Debug)]
pub struct IocReport {
    pub ioc_value: String,
    pub raw_data: Value,
    pub html_report: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IocDescription {
    pub description: String,
    pub tags: Vec<String>,
}

/// External case-management adapter (spec section 4.8 step 1, 4, 5):
/// fetches enrichment reports from a primary and fallback intel source,
/// posts comments, and reads/updates the IOC's description and tags.
#[async_trait]
pub trait CaseAdapter: Send + Sync {
    async fn primary_report(&self, case_id: i64, ioc_id: i64) -> Result<Option<IocReport>, AppError>;
    async fn fallback_report(&self, case_id: i64, ioc_id: i64) -> Result<Option<IocReport>, AppError>;
    async fn add_comment(&self, case_id: i64, ioc_id: i64, comment: &str) -> Result<(), AppError>;
    async fn get_description(&self, case_id: i64, ioc_id: i64) -> Result<IocDescription, AppError>;
    async fn update_ioc(&self, case_id: i64, ioc_id: i64, description: &str, tags: &[String]) -> Result<(), AppError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl RiskLevel {
    fn from_score(score: i32) -> Self {
        if score >= 80 {
            RiskLevel::Critical
        } else if score >= 60 {
            RiskLevel::High
        } else if score >= 30 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::High => "HIGH",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Low => "LOW",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IocType {
    Ip,
    Hash,
    Domain,
    Unknown,
}

impl IocType {
    fn as_str(&self) -> &'static str {
        match self {
            IocType::Ip => "ip",
            IocType::Hash => "hash",
            IocType::Domain => "domain",
            IocType::Unknown => "unknown",
        }
    }
}

/// IOC-type classification (spec section 4.8): IP parses as IPv4/IPv6,
/// hash is 32/40/64 hex characters, domain contains a `.` and passes
/// per-label validation and is not an IP.
pub fn classify_ioc_type(value: &str) -> IocType {
    if value.parse::<IpAddr>().is_ok() {
        return IocType::Ip;
    }

    if matches!(value.len(), 32 | 40 | 64) && value.chars().all(|c| c.is_ascii_hexdigit()) {
        return IocType::Hash;
    }

    if is_domain(value) {
        return IocType::Domain;
    }

    IocType::Unknown
}

fn is_domain(value: &str) -> bool {
    if value.parse::<IpAddr>().is_ok() || !value.contains('.') {
        return false;
    }

    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() < 2 {
        return false;
    }

    for part in &parts {
        if part.is_empty() || part.starts_with('-') || part.ends_with('-') {
            return false;
        }
        if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }

    let tld = parts[parts.len() - 1];
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

#[derive(Clone, Debug, Serialize)]
pub struct EnrichmentResult {
    pub status: &'static str,
    pub summary: String,
    pub risk_level: String,
    pub recommendations: Vec<String>,
    pub description_updated: bool,
    pub data_source: String,
}

struct Finding {
    priority: i32,
    summary: Value,
}

static SMARTXDR_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)--- \[SmartXDR AI Analysis .*? ---.*?(\n\n|$)").unwrap());

/// Strips any prior `--- [SmartXDR AI Analysis ... ---` section from the
/// description (spec section 4.8 step 5), then prepends the new
/// timestamped, risk-tagged section.
fn merge_description(current_desc: &str, risk_level: RiskLevel, summary: &str, now: chrono::DateTime<Utc>) -> String {
    let timestamp = now.format("%Y-%m-%d %H:%M");
    let header = format!("--- [SmartXDR AI Analysis {timestamp}] [{}] ---", risk_level.as_str());
    let new_section = format!("{header}\n{summary}");

    let cleaned = SMARTXDR_SECTION.replace_all(current_desc, "").trim().to_string();

    if cleaned.is_empty() {
        new_section
    } else {
        format!("{new_section}\n\n{cleaned}")
    }
}

/// Pulls bullet/numbered lines out of the LLM's free-text analysis as a
/// compact recommendations list, grounded on `_extract_recommendations`
/// (lines starting with `-` or `N.`, capped at the top 5).
fn extract_recommendations(ai_text: &str) -> Vec<String> {
    let mut recommendations = Vec::new();
    for line in ai_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let is_bullet = line.starts_with('-') || line.starts_with('*');
        let is_numbered = line.chars().next().is_some_and(|c| c.is_ascii_digit()) && line.contains('.');
        if is_bullet || is_numbered {
            let cleaned = line.trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.' || c == ' ');
            if !cleaned.is_empty() {
                recommendations.push(cleaned.to_string());
            }
        }
        if recommendations.len() == 5 {
            break;
        }
    }
    recommendations
}

fn merge_tags(current_tags: &[String], risk_level: RiskLevel, data_source: &str) -> Vec<String> {
    let mut tags: Vec<String> = current_tags.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
    for tag in [
        "smartxdr-analyzed".to_string(),
        format!("risk:{}", risk_level.as_str().to_lowercase()),
        format!("source:{}", data_source.to_lowercase()),
    ] {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

pub struct EnrichmentOrchestrator {
    adapter: Arc<dyn CaseAdapter>,
    registry: Arc<AnalyzerRegistry>,
    llm: Arc<dyn LLMProvider>,
    rag: Arc<RagPipeline>,
    prompts: Arc<PromptBuilder>,
    chat_model: String,
    summary_model: String,
}

impl EnrichmentOrchestrator {
    pub fn new(
        adapter: Arc<dyn CaseAdapter>,
        registry: Arc<AnalyzerRegistry>,
        llm: Arc<dyn LLMProvider>,
        rag: Arc<RagPipeline>,
        prompts: Arc<PromptBuilder>,
        chat_model: String,
        summary_model: String,
    ) -> Self {
        Self { adapter, registry, llm, rag, prompts, chat_model, summary_model }
    }

    /// Collects per-sub-report findings and the overall risk score (spec
    /// section 4.8 step 3), grounded on `_extract_critical_findings`/
    /// `_determine_risk_level`.
    fn collect_findings(&self, raw_data: &Value) -> (Vec<Value>, i32) {
        let reports = raw_data.get("analyzer_reports").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut findings = Vec::new();
        let mut max_risk = 0;

        for report in &reports {
            if report.get("status").and_then(Value::as_str) != Some("SUCCESS") {
                continue;
            }
            let name = report.get("name").and_then(Value::as_str).unwrap_or("");
            let report_data = report.get("report").cloned().unwrap_or(Value::Null);
            let handler = self.registry.get_or_generic(name);

            max_risk = max_risk.max(handler.get_risk_score(&report_data));

            if let Some(summary) = handler.summarize(report) {
                findings.push(Finding { priority: handler.priority(), summary });
            }
        }

        findings.sort_by(|a, b| b.priority.cmp(&a.priority));
        let capped: Vec<Value> = findings.into_iter().take(15).map(|f| f.summary).collect();
        (capped, max_risk)
    }

    /// Tailored RAG context for the IOC (spec section 4.8 step 3), capped
    /// at 1500 characters, grounded on `_get_rag_context_for_ioc`.
    async fn rag_context(&self, ioc_type: IocType, risk_level: RiskLevel) -> String {
        let ioc_hint = match ioc_type {
            IocType::Ip => "IP address threat response firewall rules network policy",
            IocType::Domain => "domain DNS blocking threat intelligence MISP",
            IocType::Hash => "malware hash file detection endpoint security",
            IocType::Unknown => "threat detection security response",
        };
        let risk_hint = match risk_level {
            RiskLevel::Critical => " critical incident response isolation containment",
            RiskLevel::High => " high risk alert investigation",
            RiskLevel::Medium => " medium risk monitoring",
            RiskLevel::Low => "",
        };
        let query = format!("{ioc_hint}{risk_hint}");

        let mut filters = HashMap::new();
        filters.insert("is_active".to_string(), serde_json::json!(true));

        match self.rag.build_context_from_query(&query, 5, &filters, false).await {
            Ok((context, _)) if context != "No relevant context found. Use general cybersecurity knowledge to answer if possible." => {
                context.chars().take(1500).collect()
            }
            _ => String::new(),
        }
    }

    /// `LLMEnricher.explain` (spec section 4.8 step 3): findings, risk
    /// level, RAG context, and the model call itself.
    async fn explain(&self, ioc_value: &str, raw_data: &Value) -> Result<(String, RiskLevel, Vec<Value>), AppError> {
        let ioc_type = classify_ioc_type(ioc_value);
        let (findings, max_risk) = self.collect_findings(raw_data);
        let risk_level = RiskLevel::from_score(max_risk);
        let context = self.rag_context(ioc_type, risk_level).await;

        let analyzer_report = serde_json::to_string_pretty(&findings).unwrap_or_default();

        let mut vars = HashMap::new();
        vars.insert("ioc_value", ioc_value.to_string());
        vars.insert("ioc_type", ioc_type.as_str().to_string());
        vars.insert("analyzer_report", analyzer_report);
        vars.insert("context", context);

        let (system_prompt, user_prompt) = self
            .prompts
            .render("ioc_enrichment", &vars)
            .ok_or_else(|| AppError::ApiError("ioc_enrichment prompt template missing".into()))?;

        let template = self.prompts.template("ioc_enrichment");
        let max_tokens = template.and_then(|t| t.max_tokens).unwrap_or(400);
        let temperature = template.and_then(|t| t.temperature).unwrap_or(0.1);

        let response = self
            .llm
            .chat(&system_prompt, &user_prompt, &self.chat_model, max_tokens, temperature)
            .await
            .map_err(|e| AppError::ApiError(e.to_string()))?;

        Ok((response.text, risk_level, findings))
    }

    async fn summarize_for_description(&self, explanation: &str) -> Result<String, AppError> {
        let mut vars = HashMap::new();
        vars.insert("explanation", explanation.to_string());

        let (system_prompt, user_prompt) = self
            .prompts
            .render("ioc_description_summary", &vars)
            .ok_or_else(|| AppError::ApiError("ioc_description_summary prompt template missing".into()))?;

        let template = self.prompts.template("ioc_description_summary");
        let max_tokens = template.and_then(|t| t.max_tokens).unwrap_or(120);
        let temperature = template.and_then(|t| t.temperature).unwrap_or(0.0);

        let response = self
            .llm
            .chat(&system_prompt, &user_prompt, &self.summary_model, max_tokens, temperature)
            .await
            .map_err(|e| AppError::ApiError(e.to_string()))?;

        Ok(response.text.chars().take(1000).collect())
    }

    /// `enrich_ioc(case_id, ioc_id, update_description)` (spec section 4.8).
    pub async fn enrich_ioc(&self, case_id: i64, ioc_id: i64, update_description: bool) -> Result<EnrichmentResult, AppError> {
        let (report, data_source) = match self.adapter.primary_report(case_id, ioc_id).await? {
            Some(report) => (report, "IntelOwl"),
            None => match self.adapter.fallback_report(case_id, ioc_id).await? {
                Some(report) => (report, "MISP"),
                None => {
                    return Ok(EnrichmentResult {
                        status: "no_report",
                        summary: String::new(),
                        risk_level: "UNKNOWN".to_string(),
                        recommendations: Vec::new(),
                        description_updated: false,
                        data_source: String::new(),
                    });
                }
            },
        };

        let (summary, risk_level, _findings) = self.explain(&report.ioc_value, &report.raw_data).await?;
        let recommendations = extract_recommendations(&summary);

        let source_label = format!("[SmartXDR AI Analysis - {data_source}]");
        let comment = format!("{source_label}\n\n{summary}");
        self.adapter.add_comment(case_id, ioc_id, &comment).await?;

        let mut description_updated = false;
        if update_description {
            let condensed = self.summarize_for_description(&comment).await?;
            if !condensed.trim().is_empty() {
                let current = self.adapter.get_description(case_id, ioc_id).await?;
                let new_description = merge_description(&current.description, risk_level, &condensed, Utc::now());
                let new_tags = merge_tags(&current.tags, risk_level, data_source);
                self.adapter.update_ioc(case_id, ioc_id, &new_description, &new_tags).await?;
                description_updated = true;
            }
        }

        Ok(EnrichmentResult {
            status: "success",
            summary,
            risk_level: risk_level.as_str().to_string(),
            recommendations,
            description_updated,
            data_source: data_source.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_recommendations_pulls_bullets_and_numbered_lines() {
        let text = "Analysis: this IP is suspicious.\n- Block the source IP\n- Review firewall logs\n2. Escalate to SOC\nNot a recommendation line.";
        let recs = extract_recommendations(text);
        assert_eq!(recs, vec!["Block the source IP".to_string(), "Review firewall logs".to_string(), "Escalate to SOC".to_string()]);
    }

    #[test]
    fn extract_recommendations_caps_at_five() {
        let text = (1..=10).map(|i| format!("- action {i}")).collect::<Vec<_>>().join("\n");
        let recs = extract_recommendations(&text);
        assert_eq!(recs.len(), 5);
    }

    #[test]
    fn classifies_ipv4_and_ipv6() {
        assert_eq!(classify_ioc_type("8.8.8.8"), IocType::Ip);
        assert_eq!(classify_ioc_type("2001:4860:4860::8888"), IocType::Ip);
    }

    #[test]
    fn classifies_sha256_hash() {
        let hash = "a".repeat(64);
        assert_eq!(classify_ioc_type(&hash), IocType::Hash);
    }

    #[test]
    fn classifies_domain() {
        assert_eq!(classify_ioc_type("evil-example.com"), IocType::Domain);
    }

    #[test]
    fn rejects_malformed_domain() {
        assert_eq!(classify_ioc_type("-bad.com"), IocType::Unknown);
        assert_eq!(classify_ioc_type("no-dot-here"), IocType::Unknown);
    }

    #[test]
    fn risk_level_thresholds_match_spec() {
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
    }

    #[test]
    fn merge_description_strips_prior_smartxdr_section() {
        let now = Utc::now();
        let first = merge_description("Original notes.", RiskLevel::High, "first analysis", now);
        let second = merge_description(&first, RiskLevel::Critical, "second analysis", now);
        assert!(!second.contains("first analysis"));
        assert!(second.contains("second analysis"));
        assert!(second.contains("Original notes."));
    }

    #[test]
    fn merge_description_with_empty_prior_has_no_leading_blank_section() {
        let now = Utc::now();
        let merged = merge_description("", RiskLevel::Low, "summary text", now);
        assert!(merged.starts_with("--- [SmartXDR AI Analysis"));
        assert!(!merged.contains("\n\n\n"));
    }

    #[test]
    fn merge_tags_adds_standard_tags_without_duplicating() {
        let tags = merge_tags(&["existing".to_string(), "smartxdr-analyzed".to_string()], RiskLevel::High, "IntelOwl");
        assert_eq!(tags.iter().filter(|t| *t == "smartxdr-analyzed").count(), 1);
        assert!(tags.contains(&"risk:high".to_string()));
        assert!(tags.contains(&"source:intelowl".to_string()));
    }
}
