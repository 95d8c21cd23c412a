//! Two-tier response cache (spec section 4.4), grounded 1:1 on
//! `app/utils/cache.py`'s `ResponseCache`: L1 in-memory, L2 via a
//! `KVStore`, with an optional semantic-similarity third tier gated by an
//! entity/action-verb conflict check so a "disable X" answer can never be
//! served back for "enable X".

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::kvstore::KVStore;
use crate::models::{sha256_hex, CacheEntry};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

const REDIS_KEY_PREFIX: &str = "rag_cache:";

static TRAILING_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?!.…]+$").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static IP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static MITRE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bt\d{4}(?:\.\d{3})?\b").unwrap());
static CVE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bcve-\d{4}-\d+\b").unwrap());

/// Entity patterns used for cache-key entity prefixing and conflict
/// detection. Order matches `app/utils/cache.py::_ENTITY_PATTERNS`.
static ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("ip", Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}(?:/\d{1,2})?\b").unwrap()),
        ("ipv6", Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").unwrap()),
        ("domain", Regex::new(r"\b(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]{2,}\b").unwrap()),
        ("hash_md5", Regex::new(r"\b[a-fA-F0-9]{32}\b").unwrap()),
        ("hash_sha1", Regex::new(r"\b[a-fA-F0-9]{40}\b").unwrap()),
        ("hash_sha256", Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap()),
        ("cve", Regex::new(r"(?i)\bCVE-\d{4}-\d+\b").unwrap()),
        ("mitre", Regex::new(r"(?i)\bt[a]?\d{4}(?:\.\d{3})?\b").unwrap()),
        ("port", Regex::new(r"(?i)\bport\s*[:\s]?\s*(\d{1,5})\b").unwrap()),
        ("email", Regex::new(r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b").unwrap()),
    ]
});

/// Pairs of opposite action verbs (spec section 4.4). English only here —
/// the original also carried Vietnamese pairs for a bilingual deployment
/// this rewrite doesn't target.
const OPPOSITE_ACTIONS: &[(&str, &str)] = &[
    ("enable", "disable"),
    ("start", "stop"),
    ("on", "off"),
    ("open", "close"),
    ("add", "remove"),
    ("create", "delete"),
    ("install", "uninstall"),
    ("activate", "deactivate"),
    ("allow", "block"),
    ("permit", "deny"),
    ("grant", "revoke"),
];

#[derive(Serialize, Debug)]
pub struct CacheStats {
    pub l1_cache_size: usize,
    pub redis_available: bool,
    pub ttl: u64,
    pub enabled: bool,
    pub semantic_cache_enabled: bool,
}

pub struct ResponseCache {
    ttl_secs: i64,
    enabled: bool,
    semantic_enabled: bool,
    similarity_threshold: f32,
    local: RwLock<HashMap<String, CacheEntry>>,
    redis: Option<Arc<dyn KVStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl ResponseCache {
    pub fn new(
        ttl_secs: u64,
        enabled: bool,
        semantic_enabled: bool,
        similarity_threshold: f32,
        redis: Option<Arc<dyn KVStore>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            ttl_secs: ttl_secs as i64,
            enabled,
            semantic_enabled: semantic_enabled && embedder.is_some(),
            similarity_threshold,
            local: RwLock::new(HashMap::new()),
            redis,
            embedder,
        }
    }

    fn normalize_query(&self, query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }
        let mut normalized = query.to_lowercase().trim().to_string();
        normalized = TRAILING_PUNCT.replace(&normalized, "").to_string();
        normalized = WHITESPACE.replace_all(&normalized, " ").to_string();

        let mut entities: Vec<String> = Vec::new();
        entities.extend(IP_PATTERN.find_iter(&normalized).map(|m| m.as_str().to_string()));
        entities.extend(MITRE_PATTERN.find_iter(&normalized).map(|m| m.as_str().to_string()));
        entities.extend(CVE_PATTERN.find_iter(&normalized).map(|m| m.as_str().to_string()));

        if entities.is_empty() {
            return normalized.trim().to_string();
        }

        let mut unique: Vec<String> = entities.iter().map(|e| e.to_uppercase()).collect::<HashSet<_>>().into_iter().collect();
        unique.sort();
        let entity_prefix = unique.join(" ");

        for entity in &entities {
            let pattern = Regex::new(&regex::escape(entity)).unwrap();
            normalized = pattern.replace_all(&normalized, "").to_string();
        }
        normalized = WHITESPACE.replace_all(&normalized, " ").trim().to_string();

        format!("{entity_prefix} {normalized}").trim().to_string()
    }

    pub fn get_cache_key(&self, query: &str, context_hash: &str) -> String {
        let normalized = self.normalize_query(query);
        sha256_hex(format!("{normalized}:{context_hash}").as_bytes())
    }

    /// Raw (un-prefixed, original-case) entity matches across all
    /// recognized entity patterns, used by the RAG pipeline to enhance a
    /// query with entities mentioned earlier in a conversation.
    pub fn extract_entity_values(text: &str) -> Vec<String> {
        let mut values = Vec::new();
        for (_, pattern) in ENTITY_PATTERNS.iter() {
            values.extend(pattern.find_iter(text).map(|m| m.as_str().to_string()));
        }
        values
    }

    fn extract_entities(text: &str) -> HashSet<String> {
        let mut entities = HashSet::new();
        for (entity_type, pattern) in ENTITY_PATTERNS.iter() {
            for m in pattern.find_iter(text) {
                entities.insert(format!("{entity_type}:{}", m.as_str().to_lowercase()));
            }
        }
        entities
    }

    fn has_entity_or_action_conflict(query1: &str, query2: &str) -> bool {
        if query1.is_empty() || query2.is_empty() {
            return false;
        }
        let q1 = query1.to_lowercase();
        let q2 = query2.to_lowercase();

        for (action_a, action_b) in OPPOSITE_ACTIONS {
            let q1_has_a = q1.contains(action_a);
            let q1_has_b = q1.contains(action_b);
            let q2_has_a = q2.contains(action_a);
            let q2_has_b = q2.contains(action_b);
            if (q1_has_a && q2_has_b) || (q1_has_b && q2_has_a) {
                return true;
            }
        }

        let entities1 = Self::extract_entities(query1);
        let entities2 = Self::extract_entities(query2);
        if entities1.is_empty() && entities2.is_empty() {
            return false;
        }

        let types1: HashSet<&str> = entities1.iter().map(|e| e.split(':').next().unwrap_or("")).collect();
        let types2: HashSet<&str> = entities2.iter().map(|e| e.split(':').next().unwrap_or("")).collect();

        for etype in types1.intersection(&types2) {
            let prefix = format!("{etype}:");
            let vals1: HashSet<&String> = entities1.iter().filter(|e| e.starts_with(&prefix)).collect();
            let vals2: HashSet<&String> = entities2.iter().filter(|e| e.starts_with(&prefix)).collect();
            if vals1 != vals2 {
                return true;
            }
        }
        false
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        Utc::now().timestamp() - entry.timestamp < self.ttl_secs
    }

    async fn find_similar_cached(&self, query_embedding: &[f32]) -> Option<(String, f32)> {
        let local = self.local.read().await;
        let mut best_key = None;
        let mut best_similarity = 0.0f32;
        for (key, entry) in local.iter() {
            if let Some(embedding) = &entry.embedding {
                let similarity = cosine_similarity(query_embedding, embedding);
                if similarity > best_similarity {
                    best_similarity = similarity;
                    best_key = Some(key.clone());
                }
            }
        }
        if best_similarity >= self.similarity_threshold {
            best_key.map(|k| (k, best_similarity))
        } else {
            None
        }
    }

    pub async fn get(&self, cache_key: &str, query: Option<&str>) -> Option<String> {
        if !self.enabled {
            return None;
        }

        // L1
        {
            let mut local = self.local.write().await;
            if let Some(entry) = local.get(cache_key) {
                if self.is_fresh(entry) {
                    log::debug!("cache hit (L1 in-memory)");
                    return Some(entry.response.clone());
                }
                local.remove(cache_key);
            }
        }

        // L2
        if let Some(redis) = &self.redis {
            let redis_key = format!("{REDIS_KEY_PREFIX}{cache_key}");
            if let Ok(Some(raw)) = redis.get(&redis_key).await {
                if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                    let response = entry.response.clone();
                    self.local.write().await.insert(cache_key.to_string(), entry);
                    log::debug!("cache hit (L2 redis)");
                    return Some(response);
                }
            }
        }

        // Semantic match, only attempted after exact lookups miss
        if self.semantic_enabled {
            if let (Some(embedder), Some(query)) = (&self.embedder, query) {
                if let Ok(query_embedding) = embedder.embed_query(query).await {
                    if let Some((similar_key, similarity)) = self.find_similar_cached(&query_embedding).await {
                        let local = self.local.read().await;
                        if let Some(entry) = local.get(&similar_key) {
                            if self.is_fresh(entry) {
                                if Self::has_entity_or_action_conflict(query, &entry.original_query) {
                                    log::warn!(
                                        "semantic cache rejected: conflict between '{}' and '{}'",
                                        query,
                                        entry.original_query
                                    );
                                } else {
                                    log::debug!("cache hit (semantic match {:.1}%)", similarity * 100.0);
                                    return Some(entry.response.clone());
                                }
                            }
                        }
                    }
                }
            }
        }

        None
    }

    pub async fn set(&self, cache_key: &str, response: &str, query: Option<&str>) {
        if !self.enabled {
            return;
        }

        let embedding = if self.semantic_enabled {
            match (&self.embedder, query) {
                (Some(embedder), Some(query)) => embedder.embed_query(query).await.ok(),
                _ => None,
            }
        } else {
            None
        };

        let entry = CacheEntry {
            response: response.to_string(),
            timestamp: Utc::now().timestamp(),
            original_query: query.unwrap_or("").to_string(),
            embedding,
        };

        self.local.write().await.insert(cache_key.to_string(), entry.clone());

        if let Some(redis) = &self.redis {
            let mut redis_entry = entry;
            redis_entry.embedding = None;
            if let Ok(json) = serde_json::to_string(&redis_entry) {
                let redis_key = format!("{REDIS_KEY_PREFIX}{cache_key}");
                if let Err(e) = redis.set_ex(&redis_key, &json, self.ttl_secs as u64).await {
                    log::warn!("failed to set redis cache: {e}");
                }
            }
        }
    }

    pub async fn clear(&self) {
        self.local.write().await.clear();
        if let Some(redis) = &self.redis {
            if let Err(e) = redis.delete_prefixed(REDIS_KEY_PREFIX).await {
                log::warn!("failed to clear redis cache: {e}");
            }
        }
    }

    pub async fn clear_expired(&self) {
        let mut local = self.local.write().await;
        let now = Utc::now().timestamp();
        local.retain(|_, entry| now - entry.timestamp < self.ttl_secs);
    }

    pub async fn get_stats(&self) -> CacheStats {
        CacheStats {
            l1_cache_size: self.local.read().await.len(),
            redis_available: self.redis.is_some(),
            ttl: self.ttl_secs as u64,
            enabled: self.enabled,
            semantic_cache_enabled: self.semantic_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_punctuation_and_collapses_space() {
        let cache = ResponseCache::new(3600, true, false, 0.85, None, None);
        assert_eq!(cache.normalize_query("What is   this?!"), "what is this");
    }

    #[test]
    fn normalize_prefixes_sorted_entities() {
        let cache = ResponseCache::new(3600, true, false, 0.85, None, None);
        let normalized = cache.normalize_query("is 10.0.0.5 related to CVE-2024-12345");
        assert!(normalized.starts_with("10.0.0.5 CVE-2024-12345"));
    }

    #[test]
    fn opposite_action_verbs_conflict() {
        assert!(ResponseCache::has_entity_or_action_conflict(
            "how do I enable the firewall",
            "how do I disable the firewall"
        ));
    }

    #[test]
    fn different_ips_conflict() {
        assert!(ResponseCache::has_entity_or_action_conflict(
            "is 10.0.0.1 malicious",
            "is 10.0.0.2 malicious"
        ));
    }

    #[test]
    fn same_entities_do_not_conflict() {
        assert!(!ResponseCache::has_entity_or_action_conflict(
            "is 10.0.0.1 malicious",
            "tell me more about 10.0.0.1"
        ));
    }

    #[test]
    fn no_entities_no_conflict() {
        assert!(!ResponseCache::has_entity_or_action_conflict(
            "what is a firewall",
            "explain network segmentation"
        ));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = ResponseCache::new(3600, true, false, 0.85, None, None);
        let key = cache.get_cache_key("hello", "ctx-hash");
        cache.set(&key, "world", Some("hello")).await;
        assert_eq!(cache.get(&key, Some("hello")).await, Some("world".to_string()));
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = ResponseCache::new(3600, false, false, 0.85, None, None);
        let key = cache.get_cache_key("hello", "ctx-hash");
        cache.set(&key, "world", Some("hello")).await;
        assert_eq!(cache.get(&key, Some("hello")).await, None);
    }
}
