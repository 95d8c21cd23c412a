//! Detect-act-clean reconciliation between a docs directory and the
//! repository (spec section 4.2), grounded on `scripts/rag_sync.py`'s
//! `RAGSync` class.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::chunking::chunk_file;
use crate::config::Config;
use crate::error::AppError;
use crate::models::DocumentMetadata;
use crate::repository::Repository;

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const SUPPORTED_EXT: &[&str] =
    &["md", "txt", "rst", "json", "yaml", "yml", "py", "js", "ts", "go", "java", "pdf", "markdown"];

#[derive(Clone, Debug)]
struct FileInfo {
    path: String,
    file_hash: String,
    size: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct SyncEngine {
    repository: std::sync::Arc<dyn Repository>,
    config: Config,
}

impl SyncEngine {
    pub fn new(repository: std::sync::Arc<dyn Repository>, config: Config) -> Self {
        Self { repository, config }
    }

    fn should_skip(&self, path: &Path, data_dir: &Path) -> bool {
        if path
            .components()
            .any(|c| self.config.rag_sync_skip_dirs.iter().any(|d| c.as_os_str() == d.as_str()))
        {
            return true;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if !SUPPORTED_EXT.contains(&ext.as_str()) {
            return true;
        }

        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let rel_path = path.strip_prefix(data_dir).ok().and_then(|p| p.to_str()).unwrap_or(filename);
        for pattern in &self.config.rag_sync_skip_files {
            if glob_match(pattern, filename) || glob_match(pattern, rel_path) {
                return true;
            }
        }

        match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0 || meta.len() > MAX_FILE_SIZE,
            Err(_) => true,
        }
    }

    fn scan_directory(&self, data_dir: &Path) -> HashMap<String, FileInfo> {
        let mut files = HashMap::new();
        let mut stack = vec![data_dir.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    if !self.config.rag_sync_skip_dirs.iter().any(|d| d == name) {
                        stack.push(path);
                    }
                    continue;
                }

                if self.should_skip(&path, data_dir) {
                    continue;
                }

                let Ok(rel_path) = path.strip_prefix(data_dir) else { continue };
                let rel_path = rel_path.to_string_lossy().to_string();
                let Ok(bytes) = std::fs::read(&path) else { continue };

                files.insert(
                    rel_path.clone(),
                    FileInfo {
                        path: rel_path,
                        file_hash: sha256_hex(&bytes),
                        size: bytes.len() as u64,
                    },
                );
            }
        }

        files
    }

    async fn indexed_files(&self) -> Result<HashMap<String, (Option<String>, Vec<String>)>, AppError> {
        let docs = self.repository.list(None, None, None).await?;
        let mut indexed: HashMap<String, (Option<String>, Vec<String>)> = HashMap::new();
        for doc in docs {
            let entry = indexed.entry(doc.metadata.source.clone()).or_insert((doc.metadata.file_hash.clone(), Vec::new()));
            entry.1.push(doc.id);
        }
        Ok(indexed)
    }

    fn diff(
        &self,
        current: &HashMap<String, FileInfo>,
        indexed: &HashMap<String, (Option<String>, Vec<String>)>,
        force: bool,
    ) -> (Vec<String>, Vec<String>, Vec<String>) {
        let current_paths: HashSet<&String> = current.keys().collect();
        let indexed_paths: HashSet<&String> = indexed.keys().collect();

        if force {
            let new_files: Vec<String> = current_paths.iter().map(|s| s.to_string()).collect();
            let deleted_files: Vec<String> = indexed_paths.iter().map(|s| s.to_string()).collect();
            return (new_files, Vec::new(), deleted_files);
        }

        let new_files: Vec<String> = current_paths.difference(&indexed_paths).map(|s| s.to_string()).collect();
        let deleted_files: Vec<String> = indexed_paths.difference(&current_paths).map(|s| s.to_string()).collect();

        let mut updated_files = Vec::new();
        for path in current_paths.intersection(&indexed_paths) {
            let current_hash = &current[*path].file_hash;
            let (indexed_hash, _) = &indexed[*path];
            match indexed_hash {
                None => updated_files.push((*path).clone()),
                Some(h) if h != current_hash => updated_files.push((*path).clone()),
                _ => {}
            }
        }

        (new_files, updated_files, deleted_files)
    }

    async fn chunk_and_upsert(&self, data_dir: &Path, rel_path: &str, file_hash: &str) -> Result<usize, AppError> {
        let path = data_dir.join(rel_path);
        let bytes = std::fs::read(&path).map_err(|e| AppError::Validation(format!("cannot read {rel_path}: {e}")))?;

        let chunks = chunk_file(&path, &bytes, &self.config);
        if chunks.is_empty() {
            return Ok(0);
        }

        let total = chunks.len() as u32;
        let category = rel_path.split('/').next().unwrap_or("general").to_lowercase();
        let mut metadatas = Vec::with_capacity(chunks.len());
        for (i, _) in chunks.iter().enumerate() {
            let mut meta = DocumentMetadata {
                source: rel_path.to_string(),
                source_id: rel_path.to_string(),
                version: "v1.0.0".to_string(),
                is_active: true,
                tags: vec![category.clone()],
                file_hash: Some(file_hash.to_string()),
                chunk: Some(i as u32),
                total: Some(total),
                ..Default::default()
            };
            meta.custom.insert("file".into(), serde_json::json!(path.file_name().and_then(|n| n.to_str())));
            metadatas.push(meta);
        }

        let batch_size = self.config.batch_size.min(self.config.embedding_batch_cap);
        for (content_batch, meta_batch) in chunks.chunks(batch_size).zip(metadatas.chunks(batch_size)) {
            self.repository
                .add_batch(content_batch.to_vec(), meta_batch.to_vec(), None)
                .await?;
        }

        Ok(chunks.len())
    }

    async fn remove_source(&self, source: &str, indexed: &HashMap<String, (Option<String>, Vec<String>)>) -> Result<(), AppError> {
        if let Some((_, ids)) = indexed.get(source) {
            for id in ids {
                self.repository.delete(id).await?;
            }
        }
        Ok(())
    }

    /// Runs the full detect-act-clean reconciliation over `data_dir`.
    /// `force` treats every in-tree file as new and every indexed file as
    /// stale, per spec section 4.2.
    pub async fn sync(&self, data_dir: &Path, force: bool) -> Result<SyncResult, AppError> {
        let current_files = self.scan_directory(data_dir);
        let indexed = self.indexed_files().await?;
        let (new_files, updated_files, deleted_files) = self.diff(&current_files, &indexed, force);

        let mut result = SyncResult::default();

        for path in &new_files {
            let Some(info) = current_files.get(path) else { continue };
            match self.chunk_and_upsert(data_dir, path, &info.file_hash).await {
                Ok(0) => result.skipped += 1,
                Ok(_) => result.added += 1,
                Err(_) => result.errors += 1,
            }
        }

        for path in &updated_files {
            let Some(info) = current_files.get(path) else { continue };
            // Build new chunks before deleting anything old (spec section
            // 4.2's safe-update order): a failed re-chunk must not lose data.
            match self.chunk_and_upsert(data_dir, path, &info.file_hash).await {
                Ok(0) => result.skipped += 1,
                Ok(_) => {
                    if self.remove_source(path, &indexed).await.is_err() {
                        result.errors += 1;
                    } else {
                        result.updated += 1;
                    }
                }
                Err(_) => result.errors += 1,
            }
        }

        for path in &deleted_files {
            match self.remove_source(path, &indexed).await {
                Ok(_) => result.deleted += 1,
                Err(_) => result.errors += 1,
            }
        }

        Ok(result)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Minimal `fnmatch`-style glob: supports `*` only, sufficient for the
/// skip-file patterns this config accepts (`*.log`, `README.md`, …).
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(idx) = rest.find(part) {
            rest = &rest[idx + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_wildcard_suffix() {
        assert!(glob_match("*.log", "error.log"));
        assert!(!glob_match("*.log", "error.txt"));
    }

    #[test]
    fn glob_matches_exact_pattern_without_wildcard() {
        assert!(glob_match("README.md", "README.md"));
        assert!(!glob_match("README.md", "readme.md"));
    }

    #[test]
    fn glob_matches_wildcard_prefix_and_suffix() {
        assert!(glob_match("secret/*", "secret/pass.txt"));
        assert!(!glob_match("secret/*", "public/pass.txt"));
    }
}
