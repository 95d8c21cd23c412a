//! Stateless per-request RAG orchestration (spec section 4.3), grounded on
//! `app/rag/service.py`'s `query`/`build_context_from_query` pair plus the
//! rerank/MMR helpers in `rerank.rs`/`mmr.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::ai::provider::LLMProvider;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::conversation::ConversationMemory;
use crate::error::AppError;
use crate::mmr::apply_mmr;
use crate::models::{sha256_hex, DocumentMetadata};
use crate::prompts::PromptBuilder;
use crate::rate_limiter::ApiUsageTracker;
use crate::rerank::{rerank_documents, CrossEncoder};
use crate::repository::Repository;

const NO_CONTEXT_HINT: &str = "No relevant context found. Use general cybersecurity knowledge to answer if possible.";

#[derive(Clone, Debug, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub cached: bool,
    pub sources: Vec<String>,
    pub cost: f64,
}

pub struct RagPipeline {
    config: Config,
    repository: Arc<dyn Repository>,
    llm: Arc<dyn LLMProvider>,
    cache: Arc<ResponseCache>,
    rate_limiter: Arc<ApiUsageTracker>,
    conversation: Arc<dyn ConversationMemory>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    prompts: Arc<PromptBuilder>,
}

impl RagPipeline {
    pub fn new(
        config: Config,
        repository: Arc<dyn Repository>,
        llm: Arc<dyn LLMProvider>,
        cache: Arc<ResponseCache>,
        rate_limiter: Arc<ApiUsageTracker>,
        conversation: Arc<dyn ConversationMemory>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        prompts: Arc<PromptBuilder>,
    ) -> Self {
        Self {
            config,
            repository,
            llm,
            cache,
            rate_limiter,
            conversation,
            cross_encoder,
            prompts,
        }
    }

    fn context_hash(filters: &HashMap<String, serde_json::Value>, top_k: usize) -> String {
        let mut keys: Vec<&String> = filters.keys().collect();
        keys.sort();
        let serialized: String = keys.iter().map(|k| format!("{k}={}", filters[*k])).collect::<Vec<_>>().join("&");
        sha256_hex(format!("{top_k}:{serialized}").as_bytes())
    }

    pub async fn query(
        &self,
        text: &str,
        top_k: Option<usize>,
        filters: HashMap<String, serde_json::Value>,
        session_id: Option<&str>,
    ) -> Result<RagAnswer, AppError> {
        let top_k = top_k.unwrap_or(self.config.default_results);

        // Step 1: rate-limit guard.
        self.rate_limiter
            .check_rate_limit()
            .await
            .map_err(|retry_after_secs| AppError::RateLimit { retry_after_secs })?;

        // Step 2: conversation context (optional).
        let history = match session_id {
            Some(sid) => self.conversation.recent_turns(sid).await,
            None => String::new(),
        };

        // Step 3: cache check. Responses are only cached for session-less
        // requests (spec step 11's "not cached when session_id is set").
        let cacheable = session_id.is_none();
        let context_hash = Self::context_hash(&filters, top_k);
        let cache_key = self.cache.get_cache_key(text, &context_hash);

        if cacheable {
            if let Some(cached_answer) = self.cache.get(&cache_key, Some(text)).await {
                return Ok(RagAnswer { answer: cached_answer, cached: true, sources: Vec::new(), cost: 0.0 });
            }
        }

        // Step 4: enhance query with entities surfaced earlier in the
        // conversation, then retrieve.
        let entities = ResponseCache::extract_entity_values(&history);
        let enhanced_query = if entities.is_empty() { text.to_string() } else { format!("{} {}", entities.join(" "), text) };

        let (context_text, sources) = self.build_context_from_query(&enhanced_query, top_k, &filters, true).await?;

        // Step 9: prompt build.
        let mut vars = HashMap::new();
        vars.insert("context", context_text);
        vars.insert("query", text.to_string());
        let (system_prompt, user_prompt) = self
            .prompts
            .render("rag", &vars)
            .ok_or_else(|| AppError::ApiError("rag prompt template missing".into()))?;

        let template = self.prompts.template("rag");
        let max_tokens = template.and_then(|t| t.max_tokens).unwrap_or(1024);
        let temperature = template.and_then(|t| t.temperature).unwrap_or(0.0);

        // Step 10: cost/rate checks, then the LLM call itself.
        let estimated_cost = 0.0;
        self.rate_limiter
            .check_daily_cost(estimated_cost)
            .await
            .map_err(|(current, limit)| AppError::CostLimit(format!("${current:.4}/${limit:.4}")))?;

        let response = self
            .llm
            .chat(&system_prompt, &user_prompt, &self.config.chat_model, max_tokens, temperature)
            .await
            .map_err(|e| AppError::ApiError(e.to_string()))?;

        self.rate_limiter.record_call(response.cost).await;

        // Step 11: cache store.
        if cacheable {
            self.cache.set(&cache_key, &response.text, Some(text)).await;
        }

        Ok(RagAnswer { answer: response.text, cached: false, sources, cost: response.cost })
    }

    /// Exposed for callers that want their own prompt (enrichment, alert
    /// summarization) — spec section 4.3, "Also exposes".
    pub async fn build_context_from_query(
        &self,
        query_text: &str,
        top_k: usize,
        filters: &HashMap<String, serde_json::Value>,
        use_reranking: bool,
    ) -> Result<(String, Vec<String>), AppError> {
        let retrieve_k = if use_reranking { (top_k * 2).min(self.config.max_rerank_candidates) } else { top_k };

        let mut where_clause = filters.clone();
        where_clause.entry("is_active".to_string()).or_insert_with(|| serde_json::json!(true));

        let query_result = self.repository.query(query_text, retrieve_k, Some(where_clause)).await?;

        // Step 4: fallback threshold filter.
        let (mut documents, mut distances, mut metadatas) = filter_by_threshold(
            &query_result.documents,
            &query_result.distances,
            &query_result.metadatas,
            self.config.fallback_threshold,
        );

        if documents.is_empty() {
            return Ok((NO_CONTEXT_HINT.to_string(), Vec::new()));
        }

        let sources: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            metadatas.iter().filter(|m| seen.insert(m.source.clone())).map(|m| m.source.clone()).collect()
        };

        // Step 5: strict threshold filter, falling back to the looser set
        // when it would otherwise empty the results.
        let (strict_docs, strict_dists, strict_metas) =
            filter_by_threshold(&documents, &distances, &metadatas, self.config.strict_threshold);
        if !strict_docs.is_empty() {
            documents = strict_docs;
            distances = strict_dists;
            metadatas = strict_metas;
        } else {
            log::info!("strict threshold returned 0 results, using fallback set for query: {query_text}");
        }

        // Step 6: re-rank.
        if use_reranking && documents.len() > 3 {
            let (ranked_docs, ranked_dists) = rerank_documents(
                self.cross_encoder.as_deref(),
                self.config.reranking_enabled,
                query_text,
                documents.clone(),
                distances.clone(),
            )
            .await;
            let order: Vec<usize> = ranked_docs
                .iter()
                .map(|doc| documents.iter().position(|d| d == doc).unwrap_or(0))
                .collect();
            metadatas = order.iter().map(|&i| metadatas[i].clone()).collect();
            documents = ranked_docs;
            distances = ranked_dists;
        }

        // Step 7: MMR diversification.
        if documents.len() > top_k {
            let (mmr_docs, mmr_dists, mmr_metas) = apply_mmr(documents, distances, metadatas, top_k);
            documents = mmr_docs;
            distances = mmr_dists;
            metadatas = mmr_metas;
        }

        // Step 8: context assembly with quality marker.
        let avg_distance = if distances.is_empty() { 0.0 } else { distances.iter().sum::<f32>() / distances.len() as f32 };
        let best_distance = distances.iter().cloned().fold(f32::INFINITY, f32::min);
        let best_distance = if best_distance.is_finite() { best_distance } else { 0.0 };

        let quality_hint = if best_distance < 0.6 {
            "HIGH CONFIDENCE CONTEXT (exact match found)"
        } else if best_distance < 1.0 {
            "GOOD CONTEXT (relevant documents found)"
        } else if best_distance < 1.3 {
            "MODERATE CONTEXT (loosely related documents)"
        } else {
            "LOW CONFIDENCE CONTEXT (may need inference)"
        };

        let mut context_parts = vec![format!("[Context Quality: {quality_hint}]"), String::new()];
        let mut current_length = context_parts[0].len();

        for (idx, doc) in documents.iter().enumerate() {
            let doc_text = format!("[Document {}]\n{}", idx + 1, doc);
            if current_length + doc_text.len() + 10 > self.config.max_context_chars {
                let remaining = self.config.max_context_chars.saturating_sub(current_length + 50);
                if remaining > 200 {
                    let truncated: String = doc.chars().take(remaining).collect();
                    context_parts.push(format!("[Document {}]\n{}...", idx + 1, truncated));
                }
                break;
            }
            current_length += doc_text.len() + 10;
            context_parts.push(doc_text);
        }

        let mut context_text = context_parts.join("\n\n---\n\n");

        if avg_distance > 1.3 && !documents.is_empty() {
            context_text.push_str(
                "\n\n[NOTE: Context quality is low. If the above information doesn't directly answer the question, use your general knowledge about the topic to provide a helpful response.]",
            );
        }

        Ok((context_text, sources))
    }
}

fn filter_by_threshold(
    documents: &[String],
    distances: &[f32],
    metadatas: &[DocumentMetadata],
    threshold: f32,
) -> (Vec<String>, Vec<f32>, Vec<DocumentMetadata>) {
    let mut docs = Vec::new();
    let mut dists = Vec::new();
    let mut metas = Vec::new();
    for ((doc, dist), meta) in documents.iter().zip(distances.iter()).zip(metadatas.iter()) {
        if *dist < threshold {
            docs.push(doc.clone());
            dists.push(*dist);
            metas.push(meta.clone());
        }
    }
    (docs, dists, metas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_by_threshold_keeps_only_documents_below_cutoff() {
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let dists = vec![0.2, 0.9, 1.5];
        let metas = vec![DocumentMetadata::default(), DocumentMetadata::default(), DocumentMetadata::default()];
        let (filtered, filtered_dists, _) = filter_by_threshold(&docs, &dists, &metas, 1.0);
        assert_eq!(filtered, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(filtered_dists, vec![0.2, 0.9]);
    }

    #[test]
    fn context_hash_is_stable_for_same_filters() {
        let mut filters = HashMap::new();
        filters.insert("tag".to_string(), serde_json::json!("mitre"));
        let a = RagPipeline::context_hash(&filters, 5);
        let b = RagPipeline::context_hash(&filters, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn context_hash_changes_with_top_k() {
        let filters = HashMap::new();
        let a = RagPipeline::context_hash(&filters, 5);
        let b = RagPipeline::context_hash(&filters, 10);
        assert_ne!(a, b);
    }
}
