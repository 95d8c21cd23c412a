//! Cross-encoder re-ranking (spec section 4.3), grounded on
//! `app/rag/service.py::_rerank_documents`. The original lazily loads a
//! `sentence_transformers.CrossEncoder` singleton and falls back to a
//! plain distance sort on `ImportError`, any other exception, or when
//! re-ranking is disabled via config. There is no local ML inference
//! crate anywhere in this pack, so the cross-encoder is modeled as a
//! remote scoring service behind the same HTTP-adapter idiom
//! `EmbeddingProvider`/`memory.rs` already use; the triple fallback
//! (disabled / unreachable / scoring error) is preserved exactly.

use async_trait::async_trait;
use std::error::Error;

#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Scores `(query, document)` pairs; higher is more relevant.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>>;
}

pub struct HttpCrossEncoder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpCrossEncoder {
    pub fn new(base_url: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, model }
    }
}

#[derive(serde::Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>> {
        let pairs: Vec<_> = documents.iter().map(|doc| (query, doc.as_str())).collect();
        let res = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&serde_json::json!({ "model": self.model, "pairs": pairs }))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(format!("rerank request failed: {}", res.status()).into());
        }

        let body: RerankResponse = res.json().await?;
        Ok(body.scores)
    }
}

/// Mirrors `_rerank_documents`: sorts by cross-encoder score when enabled
/// and reachable, otherwise falls back to an ascending distance sort.
pub async fn rerank_documents(
    encoder: Option<&(dyn CrossEncoder)>,
    reranking_enabled: bool,
    query: &str,
    mut documents: Vec<String>,
    mut distances: Vec<f32>,
) -> (Vec<String>, Vec<f32>) {
    if !reranking_enabled {
        log::debug!("re-ranking disabled via config");
        return distance_sort(documents, distances);
    }

    let Some(encoder) = encoder else {
        return distance_sort(documents, distances);
    };

    match encoder.score(query, &documents).await {
        Ok(scores) if scores.len() == documents.len() => {
            let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
            indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            let ranked_docs = indexed.iter().map(|(i, _)| documents[*i].clone()).collect();
            let ranked_dists = indexed.iter().map(|(i, _)| distances[*i]).collect();
            (ranked_docs, ranked_dists)
        }
        Ok(_) => {
            log::warn!("re-ranking returned a mismatched score count, using distance-based ranking");
            distance_sort(documents, distances)
        }
        Err(e) => {
            log::warn!("re-ranking failed: {e}, using distance-based ranking");
            distance_sort(documents, distances)
        }
    }
}

fn distance_sort(documents: Vec<String>, distances: Vec<f32>) -> (Vec<String>, Vec<f32>) {
    let mut indexed: Vec<(String, f32)> = documents.into_iter().zip(distances).collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.into_iter().unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_reranking_falls_back_to_distance_sort() {
        let docs = vec!["b".to_string(), "a".to_string()];
        let dists = vec![0.9, 0.2];
        let (ranked_docs, ranked_dists) = rerank_documents(None, false, "q", docs, dists).await;
        assert_eq!(ranked_docs, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ranked_dists, vec![0.2, 0.9]);
    }

    #[tokio::test]
    async fn no_encoder_falls_back_to_distance_sort() {
        let docs = vec!["b".to_string(), "a".to_string()];
        let dists = vec![0.9, 0.2];
        let (ranked_docs, _) = rerank_documents(None, true, "q", docs, dists).await;
        assert_eq!(ranked_docs, vec!["a".to_string(), "b".to_string()]);
    }
}
