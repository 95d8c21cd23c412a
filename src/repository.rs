//! Vector-store repository (spec section 4.1), grounded on the teacher's
//! `memory.rs` Chroma HTTP client (`ensure_collection`, `store_fingerprint`,
//! `query_similar_behaviors`), generalized from a single hard-coded
//! "hive_mind" collection into the full document CRUD + query surface the
//! RAG pipeline and sync engine need.

use crate::embedding::EmbeddingProvider;
use crate::error::AppError;
use crate::models::{derive_document_id, Document, DocumentMetadata, QueryResult, RepositoryStats};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn add(
        &self,
        id: Option<String>,
        content: String,
        metadata: DocumentMetadata,
    ) -> Result<String, AppError>;

    async fn add_batch(
        &self,
        contents: Vec<String>,
        metadatas: Vec<DocumentMetadata>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, AppError>;

    async fn get(&self, id: &str) -> Result<Option<Document>, AppError>;

    async fn update(
        &self,
        id: &str,
        content: Option<String>,
        metadata: Option<DocumentMetadata>,
    ) -> Result<bool, AppError>;

    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    async fn soft_delete(&self, id: &str) -> Result<bool, AppError>;

    async fn query(
        &self,
        text: &str,
        n: usize,
        where_filter: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<QueryResult, AppError>;

    async fn list(
        &self,
        where_filter: Option<HashMap<String, serde_json::Value>>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Document>, AppError>;

    async fn count(&self, where_filter: Option<HashMap<String, serde_json::Value>>) -> Result<usize, AppError>;

    async fn deactivate_old_versions(&self, source_id: &str, keep_version: &str) -> Result<usize, AppError>;

    async fn stats(&self) -> Result<RepositoryStats, AppError>;
}

/// Chroma wire format, mirroring what the teacher's `ChromaQueryResponse`
/// already decodes, extended with `where` filtering and upsert/get/delete.
#[derive(Deserialize, Debug, Default)]
struct ChromaQueryResponse {
    ids: Vec<Vec<String>>,
    distances: Option<Vec<Vec<f32>>>,
    metadatas: Option<Vec<Vec<serde_json::Value>>>,
    documents: Option<Vec<Vec<String>>>,
}

#[derive(Deserialize, Debug, Default)]
struct ChromaGetResponse {
    ids: Vec<String>,
    metadatas: Option<Vec<serde_json::Value>>,
    documents: Option<Vec<String>>,
}

pub struct ChromaRepository {
    client: reqwest::Client,
    base_url: String,
    collection_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ChromaRepository {
    pub fn new(base_url: String, collection_name: String, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            collection_name,
            embedder,
        }
    }

    async fn collection_uuid(&self) -> Result<String, AppError> {
        let _ = self
            .client
            .post(format!("{}/api/v1/collections", self.base_url))
            .json(&json!({ "name": self.collection_name, "get_or_create": true, "metadata": { "hnsw:space": "cosine" } }))
            .send()
            .await
            .map_err(|e| AppError::Store(format!("failed to ensure collection: {e}")))?;

        let resp = self
            .client
            .get(format!("{}/api/v1/collections/{}", self.base_url, self.collection_name))
            .send()
            .await
            .map_err(|e| AppError::Store(format!("failed to fetch collection: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Store(format!(
                "chroma collection lookup returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AppError::Store(format!("invalid collection response: {e}")))?;

        body["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Store("chroma collection response missing id".into()))
    }

    fn metadata_to_json(meta: &DocumentMetadata) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("source".into(), json!(meta.source));
        map.insert("source_id".into(), json!(meta.source_id));
        map.insert("version".into(), json!(meta.version));
        map.insert("is_active".into(), json!(meta.is_active));
        map.insert("tags".into(), json!(meta.tags.join(",")));
        if let Some(ts) = meta.created_at {
            map.insert("created_at".into(), json!(ts.to_rfc3339()));
        }
        if let Some(ts) = meta.updated_at {
            map.insert("updated_at".into(), json!(ts.to_rfc3339()));
        }
        if let Some(h) = &meta.file_hash {
            map.insert("file_hash".into(), json!(h));
        }
        if let Some(c) = meta.chunk {
            map.insert("chunk".into(), json!(c));
        }
        if let Some(t) = meta.total {
            map.insert("total".into(), json!(t));
        }
        for (k, v) in &meta.custom {
            map.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(map)
    }

    fn metadata_from_json(value: &serde_json::Value) -> DocumentMetadata {
        let mut meta = DocumentMetadata {
            source: value["source"].as_str().unwrap_or_default().to_string(),
            source_id: value["source_id"].as_str().unwrap_or_default().to_string(),
            version: value["version"].as_str().unwrap_or_default().to_string(),
            is_active: value["is_active"].as_bool().unwrap_or(true),
            tags: value["tags"]
                .as_str()
                .map(|s| s.split(',').filter(|t| !t.is_empty()).map(String::from).collect())
                .unwrap_or_default(),
            created_at: value["created_at"].as_str().and_then(|s| s.parse().ok()),
            updated_at: value["updated_at"].as_str().and_then(|s| s.parse().ok()),
            file_hash: value["file_hash"].as_str().map(String::from),
            chunk: value["chunk"].as_u64().map(|v| v as u32),
            total: value["total"].as_u64().map(|v| v as u32),
            custom: HashMap::new(),
        };
        if let Some(obj) = value.as_object() {
            let known = [
                "source", "source_id", "version", "is_active", "tags", "created_at", "updated_at", "file_hash",
                "chunk", "total",
            ];
            for (k, v) in obj {
                if !known.contains(&k.as_str()) {
                    meta.custom.insert(k.clone(), v.clone());
                }
            }
        }
        meta
    }
}

#[async_trait]
impl Repository for ChromaRepository {
    async fn add(
        &self,
        id: Option<String>,
        content: String,
        mut metadata: DocumentMetadata,
    ) -> Result<String, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("document content must not be empty".into()));
        }
        if metadata.source.is_empty() {
            return Err(AppError::Validation("document metadata.source must not be empty".into()));
        }

        let now = Utc::now();
        if metadata.created_at.is_none() {
            metadata.created_at = Some(now);
        }
        metadata.updated_at = Some(now);

        let doc_id = id.unwrap_or_else(|| derive_document_id(&metadata.source_id, &metadata.version, &content));

        let embedding = self
            .embedder
            .embed(&[content.clone()])
            .await
            .map_err(|e| AppError::Connection(format!("embedding failed: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Store("embedding provider returned no vectors".into()))?;

        let collection = self.collection_uuid().await?;
        let resp = self
            .client
            .post(format!("{}/api/v1/collections/{}/add", self.base_url, collection))
            .json(&json!({
                "ids": [doc_id],
                "embeddings": [embedding],
                "metadatas": [Self::metadata_to_json(&metadata)],
                "documents": [content],
            }))
            .send()
            .await
            .map_err(|e| AppError::Store(format!("chroma add failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Store(format!("chroma add returned {}", resp.status())));
        }

        Ok(doc_id)
    }

    async fn add_batch(
        &self,
        contents: Vec<String>,
        metadatas: Vec<DocumentMetadata>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, AppError> {
        if contents.len() != metadatas.len() {
            return Err(AppError::Validation("contents and metadatas must have equal length".into()));
        }
        if let Some(ids) = &ids {
            if ids.len() != contents.len() {
                return Err(AppError::Validation("ids length must match contents length".into()));
            }
        }

        let mut out_ids = Vec::with_capacity(contents.len());
        for (i, (content, meta)) in contents.into_iter().zip(metadatas.into_iter()).enumerate() {
            let id = ids.as_ref().map(|v| v[i].clone());
            let doc_id = self.add(id, content, meta).await?;
            out_ids.push(doc_id);
        }
        Ok(out_ids)
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, AppError> {
        let collection = self.collection_uuid().await?;
        let resp = self
            .client
            .post(format!("{}/api/v1/collections/{}/get", self.base_url, collection))
            .json(&json!({ "ids": [id], "include": ["metadatas", "documents"] }))
            .send()
            .await
            .map_err(|e| AppError::Store(format!("chroma get failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Store(format!("chroma get returned {}", resp.status())));
        }

        let body: ChromaGetResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Store(format!("invalid chroma get response: {e}")))?;

        if body.ids.is_empty() {
            return Ok(None);
        }

        let content = body.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let metadata = body
            .metadatas
            .and_then(|m| m.into_iter().next())
            .map(|v| Self::metadata_from_json(&v))
            .unwrap_or_default();

        Ok(Some(Document {
            id: body.ids[0].clone(),
            content,
            metadata,
        }))
    }

    async fn update(
        &self,
        id: &str,
        content: Option<String>,
        metadata: Option<DocumentMetadata>,
    ) -> Result<bool, AppError> {
        let existing = self.get(id).await?;
        let Some(existing) = existing else { return Ok(false) };

        let new_content = content.unwrap_or(existing.content);
        let mut new_meta = metadata.unwrap_or(existing.metadata.clone());
        new_meta.created_at = existing.metadata.created_at;
        new_meta.updated_at = Some(Utc::now());

        let embedding = self
            .embedder
            .embed(&[new_content.clone()])
            .await
            .map_err(|e| AppError::Connection(format!("embedding failed: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Store("embedding provider returned no vectors".into()))?;

        let collection = self.collection_uuid().await?;
        let resp = self
            .client
            .post(format!("{}/api/v1/collections/{}/update", self.base_url, collection))
            .json(&json!({
                "ids": [id],
                "embeddings": [embedding],
                "metadatas": [Self::metadata_to_json(&new_meta)],
                "documents": [new_content],
            }))
            .send()
            .await
            .map_err(|e| AppError::Store(format!("chroma update failed: {e}")))?;

        Ok(resp.status().is_success())
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let collection = self.collection_uuid().await?;
        let resp = self
            .client
            .post(format!("{}/api/v1/collections/{}/delete", self.base_url, collection))
            .json(&json!({ "ids": [id] }))
            .send()
            .await
            .map_err(|e| AppError::Store(format!("chroma delete failed: {e}")))?;
        Ok(resp.status().is_success())
    }

    async fn soft_delete(&self, id: &str) -> Result<bool, AppError> {
        let Some(existing) = self.get(id).await? else {
            return Ok(false);
        };
        let mut meta = existing.metadata;
        meta.is_active = false;
        self.update(id, None, Some(meta)).await
    }

    async fn query(
        &self,
        text: &str,
        n: usize,
        where_filter: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<QueryResult, AppError> {
        let embedding = self
            .embedder
            .embed_query(text)
            .await
            .map_err(|e| AppError::Connection(format!("embedding failed: {e}")))?;

        let collection = self.collection_uuid().await?;
        let mut payload = json!({
            "query_embeddings": [embedding],
            "n_results": n,
            "include": ["metadatas", "documents", "distances"],
        });
        if let Some(filter) = where_filter {
            payload["where"] = serde_json::to_value(filter).unwrap_or_default();
        }

        let resp = self
            .client
            .post(format!("{}/api/v1/collections/{}/query", self.base_url, collection))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Store(format!("chroma query failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Store(format!("chroma query returned {}", resp.status())));
        }

        let body: ChromaQueryResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Store(format!("invalid chroma query response: {e}")))?;

        let ids = body.ids.into_iter().next().unwrap_or_default();
        let documents = body.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let distances = body.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let metadatas = body
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default()
            .iter()
            .map(Self::metadata_from_json)
            .collect();

        Ok(QueryResult {
            documents,
            metadatas,
            distances,
            ids,
        })
    }

    async fn list(
        &self,
        where_filter: Option<HashMap<String, serde_json::Value>>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Document>, AppError> {
        let collection = self.collection_uuid().await?;
        let mut payload = json!({ "include": ["metadatas", "documents"] });
        if let Some(filter) = where_filter {
            payload["where"] = serde_json::to_value(filter).unwrap_or_default();
        }
        if let Some(limit) = limit {
            payload["limit"] = json!(limit);
        }
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }

        let resp = self
            .client
            .post(format!("{}/api/v1/collections/{}/get", self.base_url, collection))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Store(format!("chroma list failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Store(format!("chroma list returned {}", resp.status())));
        }

        let body: ChromaGetResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Store(format!("invalid chroma list response: {e}")))?;

        let documents = body.documents.unwrap_or_default();
        let metadatas = body.metadatas.unwrap_or_default();

        Ok(body
            .ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| Document {
                id,
                content: documents.get(i).cloned().unwrap_or_default(),
                metadata: metadatas.get(i).map(Self::metadata_from_json).unwrap_or_default(),
            })
            .collect())
    }

    async fn count(&self, where_filter: Option<HashMap<String, serde_json::Value>>) -> Result<usize, AppError> {
        Ok(self.list(where_filter, None, None).await?.len())
    }

    async fn deactivate_old_versions(&self, source_id: &str, keep_version: &str) -> Result<usize, AppError> {
        let mut filter = HashMap::new();
        filter.insert("source_id".to_string(), json!(source_id));
        let docs = self.list(Some(filter), None, None).await?;

        let mut affected = 0;
        for doc in docs {
            if doc.metadata.is_active && doc.metadata.version != keep_version {
                if self.soft_delete(&doc.id).await? {
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn stats(&self) -> Result<RepositoryStats, AppError> {
        let docs = self.list(None, None, None).await?;
        let mut stats = RepositoryStats {
            total: docs.len(),
            ..Default::default()
        };
        let mut sources = std::collections::HashSet::new();
        let mut source_ids = std::collections::HashSet::new();

        for doc in &docs {
            if doc.metadata.is_active {
                stats.active += 1;
            }
            sources.insert(doc.metadata.source.clone());
            source_ids.insert(doc.metadata.source_id.clone());
            for tag in &doc.metadata.tags {
                *stats.tags_distribution.entry(tag.clone()).or_insert(0) += 1;
            }
            *stats
                .version_distribution
                .entry(doc.metadata.version.clone())
                .or_insert(0) += 1;
        }

        stats.unique_sources = sources.len();
        stats.unique_source_ids = source_ids.len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_json() {
        let mut meta = DocumentMetadata {
            source: "docs/a.md".into(),
            source_id: "a".into(),
            version: "1".into(),
            is_active: true,
            tags: vec!["network".into(), "ioc".into()],
            ..Default::default()
        };
        meta.created_at = Some(Utc::now());

        let json = ChromaRepository::metadata_to_json(&meta);
        let round_tripped = ChromaRepository::metadata_from_json(&json);

        assert_eq!(round_tripped.source, meta.source);
        assert_eq!(round_tripped.source_id, meta.source_id);
        assert_eq!(round_tripped.tags, meta.tags);
        assert!(round_tripped.is_active);
    }

    #[test]
    fn metadata_preserves_custom_fields() {
        let mut meta = DocumentMetadata {
            source: "docs/a.md".into(),
            source_id: "a".into(),
            version: "1".into(),
            ..Default::default()
        };
        meta.custom.insert("mitre_id".into(), json!("T1110"));

        let json = ChromaRepository::metadata_to_json(&meta);
        let round_tripped = ChromaRepository::metadata_from_json(&json);
        assert_eq!(round_tripped.custom.get("mitre_id"), Some(&json!("T1110")));
    }
}
