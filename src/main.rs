use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{delete, get, post, put, web, App, HttpResponse, HttpServer};
use log::{info, warn};
use serde::Deserialize;

mod ai;
mod alerts;
mod analyzers;
mod cache;
mod case_adapter;
mod chunking;
mod config;
mod conversation;
mod embedding;
mod enrichment;
mod error;
mod kvstore;
mod logstore;
mod mmr;
mod models;
mod prompts;
mod rag_pipeline;
mod rate_limiter;
mod repository;
mod rerank;
mod sync_engine;

use ai::manager::{build_provider, LLMManager, ProviderKind};
use ai::provider::LLMProvider;
use alerts::AlertSummarizer;
use cache::ResponseCache;
use case_adapter::HttpCaseAdapter;
use config::Config;
use conversation::NoopConversationMemory;
use embedding::OllamaEmbeddingProvider;
use enrichment::EnrichmentOrchestrator;
use error::AppError;
use kvstore::RedisStore;
use logstore::ElasticsearchLogStore;
use models::DocumentMetadata;
use prompts::PromptBuilder;
use rag_pipeline::RagPipeline;
use rate_limiter::ApiUsageTracker;
use repository::{ChromaRepository, Repository};
use rerank::{CrossEncoder, HttpCrossEncoder};
use sync_engine::SyncEngine;

/// Every service the HTTP handlers need, built once at boot from
/// `Config` (spec section 9's explicit dependency-injection design
/// note, applied the way the teacher wires `AgentManager`/`Broadcaster`
/// into `App::new()`'s `app_data`).
struct AppState {
    config: Config,
    repository: Arc<dyn Repository>,
    rag: Arc<RagPipeline>,
    alerts: Arc<AlertSummarizer>,
    enrichment: Arc<EnrichmentOrchestrator>,
    sync_engine: Arc<SyncEngine>,
}

fn resolve_provider_kind() -> ProviderKind {
    match env::var("LLM_PROVIDER").unwrap_or_else(|_| "anthropic".to_string()).to_lowercase().as_str() {
        "openai" => ProviderKind::OpenAi,
        "gemini" => ProviderKind::Gemini,
        "ollama" => ProviderKind::Ollama,
        _ => ProviderKind::Anthropic,
    }
}

fn build_llm(cfg: &Config) -> Arc<dyn LLMProvider> {
    let kind = resolve_provider_kind();
    let api_key = match kind {
        ProviderKind::Anthropic => env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
        ProviderKind::OpenAi => env::var("OPENAI_API_KEY").unwrap_or_default(),
        ProviderKind::Gemini => env::var("GEMINI_API_KEY").unwrap_or_default(),
        ProviderKind::Ollama => String::new(),
    };
    let ollama_base_url = env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let provider = build_provider(cfg, kind, api_key, ollama_base_url);
    Arc::new(LLMManager::new(provider))
}

async fn build_app_state(cfg: Config) -> Result<web::Data<AppState>, Box<dyn std::error::Error>> {
    let embedder: Arc<dyn embedding::EmbeddingProvider> =
        Arc::new(OllamaEmbeddingProvider::new(env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string()), cfg.embedding_model.clone()));

    let repository: Arc<dyn Repository> =
        Arc::new(ChromaRepository::new(cfg.chroma_url(), "security_docs".to_string(), embedder.clone()));

    let llm = build_llm(&cfg);

    let redis: Option<Arc<dyn kvstore::KVStore>> = match RedisStore::connect(&cfg.redis_url()).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("redis unavailable, running with L1 cache only: {e}");
            None
        }
    };

    let cache = Arc::new(ResponseCache::new(
        cfg.cache_ttl_secs,
        cfg.cache_enabled,
        cfg.semantic_cache_enabled,
        cfg.similarity_threshold,
        redis,
        Some(embedder.clone()),
    ));

    let rate_limiter = Arc::new(ApiUsageTracker::new(cfg.max_calls_per_minute, cfg.max_daily_cost));
    let conversation = Arc::new(NoopConversationMemory);

    let cross_encoder: Option<Arc<dyn CrossEncoder>> = if cfg.reranking_enabled {
        Some(Arc::new(HttpCrossEncoder::new(env::var("CROSS_ENCODER_URL").unwrap_or_else(|_| "http://localhost:8090".to_string()), cfg.cross_encoder_model.clone())))
    } else {
        None
    };

    let prompts_dir = env::var("PROMPTS_DIR").unwrap_or_else(|_| "prompts".to_string());
    let prompts = Arc::new(PromptBuilder::load_from_dir(&PathBuf::from(&prompts_dir))?);

    let rag = Arc::new(RagPipeline::new(
        cfg.clone(),
        repository.clone(),
        llm.clone(),
        cache.clone(),
        rate_limiter.clone(),
        conversation.clone(),
        cross_encoder,
        prompts.clone(),
    ));

    let log_store = Arc::new(ElasticsearchLogStore::new(cfg.log_store_url.clone()));
    let alerts = Arc::new(AlertSummarizer::new(log_store, cfg.clone(), llm.clone(), prompts.clone()));

    let case_adapter = Arc::new(HttpCaseAdapter::new(cfg.case_adapter_base_url.clone(), cfg.case_adapter_api_key.clone()));
    let registry = Arc::new(analyzers::AnalyzerRegistry::with_defaults());
    let enrichment = Arc::new(EnrichmentOrchestrator::new(
        case_adapter,
        registry,
        llm.clone(),
        rag.clone(),
        prompts.clone(),
        cfg.chat_model.clone(),
        cfg.summary_model.clone(),
    ));

    let sync_engine = Arc::new(SyncEngine::new(repository.clone(), cfg.clone()));

    Ok(web::Data::new(AppState { config: cfg, repository, rag, alerts, enrichment, sync_engine }))
}

fn default_auto_deactivate_old() -> bool {
    true
}

#[derive(Deserialize)]
struct AddDocumentRequest {
    id: Option<String>,
    content: String,
    #[serde(default)]
    metadata: DocumentMetadata,
    #[serde(default = "default_auto_deactivate_old")]
    auto_deactivate_old: bool,
}

#[derive(Deserialize)]
struct AddDocumentBatchRequest {
    contents: Vec<String>,
    metadatas: Vec<DocumentMetadata>,
    ids: Option<Vec<String>>,
    #[serde(default = "default_auto_deactivate_old")]
    auto_deactivate_old: bool,
}

/// Spec invariant #1: after an active add with auto-deactivation on, at
/// most one version of `source_id` remains active. Mirrors
/// `app/rag/service.py::add_document`'s `if auto_deactivate_old and
/// is_active: self.repository.deactivate_old_versions(source_id, version)`.
async fn maybe_deactivate_old_versions(
    repository: &dyn Repository,
    metadata: &DocumentMetadata,
    auto_deactivate_old: bool,
) -> Result<(), AppError> {
    if auto_deactivate_old && metadata.is_active && !metadata.source_id.is_empty() {
        repository.deactivate_old_versions(&metadata.source_id, &metadata.version).await?;
    }
    Ok(())
}

#[post("/rag/documents")]
async fn add_document(state: web::Data<AppState>, body: web::Json<AddDocumentRequest>) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let id = state.repository.add(body.id, body.content, body.metadata.clone()).await?;
    let doc = state.repository.get(&id).await?.ok_or_else(|| AppError::Store("document vanished immediately after insert".into()))?;
    maybe_deactivate_old_versions(state.repository.as_ref(), &doc.metadata, body.auto_deactivate_old).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({
        "id": doc.id,
        "content": doc.content,
        "metadata": doc.metadata,
        "created_at": doc.metadata.created_at,
    })))
}

#[post("/rag/documents/batch")]
async fn add_document_batch(state: web::Data<AppState>, body: web::Json<AddDocumentBatchRequest>) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.contents.len() != body.metadatas.len() {
        return Err(AppError::Validation("contents and metadatas must be the same length".into()));
    }
    let metadatas = body.metadatas.clone();
    let ids = state.repository.add_batch(body.contents, body.metadatas, body.ids).await?;
    for metadata in &metadatas {
        maybe_deactivate_old_versions(state.repository.as_ref(), metadata, body.auto_deactivate_old).await?;
    }
    Ok(HttpResponse::Created().json(serde_json::json!({ "document_ids": ids, "count": ids.len() })))
}

#[derive(Deserialize)]
struct ListDocumentsQuery {
    source_id: Option<String>,
    source: Option<String>,
    version: Option<String>,
    tags: Option<String>,
    is_active: Option<bool>,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[get("/rag/documents")]
async fn list_documents(state: web::Data<AppState>, query: web::Query<ListDocumentsQuery>) -> Result<HttpResponse, AppError> {
    let mut filter: HashMap<String, serde_json::Value> = HashMap::new();
    if let Some(v) = &query.source_id {
        filter.insert("source_id".to_string(), serde_json::json!(v));
    }
    if let Some(v) = &query.source {
        filter.insert("source".to_string(), serde_json::json!(v));
    }
    if let Some(v) = &query.version {
        filter.insert("version".to_string(), serde_json::json!(v));
    }
    if let Some(v) = query.is_active {
        filter.insert("is_active".to_string(), serde_json::json!(v));
    }
    let filter = if filter.is_empty() { None } else { Some(filter) };

    let page = query.page.max(1);
    let page_size = query.page_size.max(1);
    let offset = (page - 1) * page_size;

    let total = state.repository.count(filter.clone()).await?;
    let mut docs = state.repository.list(filter, Some(page_size), Some(offset)).await?;

    if let Some(tags_csv) = &query.tags {
        let wanted: Vec<&str> = tags_csv.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
        docs.retain(|d| wanted.iter().all(|t| d.metadata.tags.iter().any(|existing| existing == t)));
    }

    let total_pages = total.div_ceil(page_size).max(1);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "documents": docs,
        "total": total,
        "page": page,
        "page_size": page_size,
        "total_pages": total_pages,
    })))
}

#[get("/rag/documents/{id}")]
async fn get_document(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    match state.repository.get(&id).await? {
        Some(doc) => Ok(HttpResponse::Ok().json(doc)),
        None => Err(AppError::NotFound(format!("document {id}"))),
    }
}

#[derive(Deserialize)]
struct UpdateDocumentRequest {
    content: Option<String>,
    metadata: Option<DocumentMetadata>,
}

#[put("/rag/documents/{id}")]
async fn update_document(state: web::Data<AppState>, path: web::Path<String>, body: web::Json<UpdateDocumentRequest>) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let body = body.into_inner();
    let updated = state.repository.update(&id, body.content, body.metadata).await?;
    if updated {
        Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": true })))
    } else {
        Err(AppError::NotFound(format!("document {id}")))
    }
}

#[derive(Deserialize)]
struct DeleteDocumentQuery {
    #[serde(default)]
    hard: bool,
}

#[delete("/rag/documents/{id}")]
async fn delete_document(state: web::Data<AppState>, path: web::Path<String>, query: web::Query<DeleteDocumentQuery>) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted = if query.hard { state.repository.delete(&id).await? } else { state.repository.soft_delete(&id).await? };
    if deleted {
        Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true, "hard": query.hard })))
    } else {
        Err(AppError::NotFound(format!("document {id}")))
    }
}

const MAX_QUERY_TOP_K: usize = 20;

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    top_k: Option<usize>,
    #[serde(default)]
    filters: HashMap<String, serde_json::Value>,
    #[serde(default = "default_include_sources")]
    include_sources: bool,
    session_id: Option<String>,
}

fn default_include_sources() -> bool {
    true
}

#[post("/rag/query")]
async fn rag_query(state: web::Data<AppState>, body: web::Json<QueryRequest>) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".into()));
    }
    if body.top_k.map(|k| k > MAX_QUERY_TOP_K).unwrap_or(false) {
        return Err(AppError::Validation(format!("top_k must not exceed {MAX_QUERY_TOP_K}")));
    }

    let started = std::time::Instant::now();
    let answer = state.rag.query(&body.query, body.top_k, body.filters, body.session_id.as_deref()).await?;
    let processing_time_ms = started.elapsed().as_millis();

    let sources = if body.include_sources { answer.sources.clone() } else { Vec::new() };
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "answer": answer.answer,
        "sources": sources,
        "cached": answer.cached,
        "metadata": {
            "documents_retrieved": answer.sources.len(),
            "processing_time_ms": processing_time_ms,
        },
    })))
}

#[get("/rag/stats")]
async fn rag_stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = state.repository.stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[derive(Deserialize)]
struct SummarizeAlertsRequest {
    #[serde(default = "default_time_window")]
    time_window_minutes: i64,
    source_ip: Option<String>,
    index_pattern: Option<String>,
    #[serde(default)]
    include_ai_analysis: bool,
}

fn default_time_window() -> i64 {
    60
}

#[post("/triage/summarize-alerts")]
async fn summarize_alerts(state: web::Data<AppState>, body: web::Json<SummarizeAlertsRequest>) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let summary = state
        .alerts
        .summarize_alerts(body.time_window_minutes, body.source_ip.as_deref(), body.index_pattern.as_deref(), body.include_ai_analysis)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[derive(Deserialize)]
struct ExplainIocRequest {
    case_id: i64,
    ioc_id: i64,
    #[serde(default)]
    update_description: bool,
}

#[post("/enrich/explain_ioc")]
async fn explain_ioc(state: web::Data<AppState>, body: web::Json<ExplainIocRequest>) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let result = state.enrichment.enrich_ioc(body.case_id, body.ioc_id, body.update_description).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize)]
struct SyncRequest {
    #[serde(default)]
    force: bool,
    docs_dir: Option<String>,
}

#[post("/admin/sync")]
async fn trigger_sync(state: web::Data<AppState>, body: web::Json<SyncRequest>) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let dir = body.docs_dir.unwrap_or_else(|| state.config.rag_sync_docs_dir.clone());
    let result = state.sync_engine.sync(std::path::Path::new(&dir), body.force).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/health")]
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let cfg = Config::from_env();
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".to_string());

    let state = build_app_state(cfg)
        .await
        .unwrap_or_else(|e| panic!("failed to initialize application state: {e}"));

    info!("smartxdr-core listening on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(health_check)
            .service(add_document)
            .service(add_document_batch)
            .service(list_documents)
            .service(get_document)
            .service(update_document)
            .service(delete_document)
            .service(rag_query)
            .service(rag_stats)
            .service(summarize_alerts)
            .service(explain_ioc)
            .service(trigger_sync)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
