use std::env;

/// Centralized config, loaded once at boot from environment variables.
///
/// The teacher scatters `env::var(...).unwrap_or_else(...)` across every
/// module; this collects the same pattern into one struct so handlers take
/// `web::Data<Config>` instead of re-reading the environment per call.
#[derive(Clone, Debug)]
pub struct Config {
    pub chat_model: String,
    pub summary_model: String,
    pub embedding_model: String,
    pub cross_encoder_model: String,

    pub max_calls_per_minute: u32,
    pub max_daily_cost: f64,

    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub semantic_cache_enabled: bool,
    pub similarity_threshold: f32,

    pub strict_threshold: f32,
    pub fallback_threshold: f32,

    pub max_rerank_candidates: usize,
    pub max_context_chars: usize,
    pub default_results: usize,
    pub reranking_enabled: bool,

    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub batch_size: usize,
    pub embedding_batch_cap: usize,

    pub rag_sync_skip_files: Vec<String>,
    pub rag_sync_skip_dirs: Vec<String>,

    pub alert_time_window_minutes: i64,
    pub alert_min_probability: f32,
    pub alert_source_types: Vec<String>,

    pub whitelist_ip_query: Vec<String>,

    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,

    pub chroma_host: String,
    pub chroma_port: u16,
    pub chroma_db_path: String,

    pub redis_host: String,
    pub redis_port: u16,

    pub debug_text_length: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,

    pub log_store_url: String,
    pub log_store_index_pattern: String,

    pub case_adapter_base_url: String,
    pub case_adapter_api_key: String,

    pub rag_sync_docs_dir: String,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            chat_model: env_string("CHAT_MODEL", "gpt-4o-mini"),
            summary_model: env_string("SUMMARY_MODEL", "gpt-4o-mini"),
            embedding_model: env_string("EMBEDDING_MODEL", "text-embedding-3-small"),
            cross_encoder_model: env_string("CROSS_ENCODER_MODEL", "cross-encoder/ms-marco-MiniLM-L-6-v2"),

            max_calls_per_minute: env_num("MAX_CALLS_PER_MINUTE", 60),
            max_daily_cost: env_num("MAX_DAILY_COST", 5.0),

            cache_enabled: env_bool("CACHE_ENABLED", true),
            cache_ttl_secs: env_num("CACHE_TTL", 3600),
            semantic_cache_enabled: env_bool("SEMANTIC_CACHE_ENABLED", false),
            similarity_threshold: env_num("SIMILARITY_THRESHOLD", 0.85),

            strict_threshold: env_num("STRICT_THRESHOLD", 1.0),
            fallback_threshold: env_num("FALLBACK_THRESHOLD", 1.4),

            max_rerank_candidates: env_num("MAX_RERANK_CANDIDATES", 20),
            max_context_chars: env_num("MAX_CONTEXT_CHARS", 8000),
            default_results: env_num("DEFAULT_RESULTS", 5),
            reranking_enabled: env_bool("RERANKING_ENABLED", true),

            max_chunk_size: env_num("MAX_CHUNK_SIZE", 1000),
            min_chunk_size: env_num("MIN_CHUNK_SIZE", 50),
            batch_size: env_num("BATCH_SIZE", 32),
            embedding_batch_cap: env_num("EMBEDDING_BATCH_CAP", 96),

            rag_sync_skip_files: env_list("RAG_SYNC_SKIP_FILES", &["*.tmp", "*.bak", ".*"]),
            rag_sync_skip_dirs: env_list("RAG_SYNC_SKIP_DIRS", &[".git", "node_modules", "__pycache__"]),

            alert_time_window_minutes: env_num("ALERT_TIME_WINDOW", 60),
            alert_min_probability: env_num("ALERT_MIN_PROBABILITY", 0.5),
            alert_source_types: env_list("ALERT_SOURCE_TYPES", &["wazuh", "pfsense"]),

            whitelist_ip_query: env_list("WHITELIST_IP_QUERY", &[]),

            input_price_per_1m: env_num("INPUT_PRICE_PER_1M", 0.15),
            output_price_per_1m: env_num("OUTPUT_PRICE_PER_1M", 0.60),

            chroma_host: env_string("CHROMA_HOST", "localhost"),
            chroma_port: env_num("CHROMA_PORT", 8000),
            chroma_db_path: env_string("CHROMA_DB_PATH", "./chroma_data"),

            redis_host: env_string("REDIS_HOST", "localhost"),
            redis_port: env_num("REDIS_PORT", 6379),

            debug_text_length: env_num("DEBUG_TEXT_LENGTH", 512),
            request_timeout_secs: env_num("REQUEST_TIMEOUT_SECS", 30),
            max_retries: env_num("MAX_RETRIES", 3),

            log_store_url: env_string("LOG_STORE_URL", "http://localhost:9200"),
            log_store_index_pattern: env_string("LOG_STORE_INDEX_PATTERN", "wazuh-alerts-*"),

            case_adapter_base_url: env_string("CASE_ADAPTER_BASE_URL", "http://localhost:8080"),
            case_adapter_api_key: env_string("CASE_ADAPTER_API_KEY", ""),

            rag_sync_docs_dir: env_string("RAG_SYNC_DOCS_DIR", "./docs"),
        }
    }

    pub fn chroma_url(&self) -> String {
        format!("http://{}:{}", self.chroma_host, self.chroma_port)
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_list_falls_back_to_default_when_unset() {
        env::remove_var("ZZZ_NOT_SET_LIST");
        let list = env_list("ZZZ_NOT_SET_LIST", &["a", "b"]);
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn env_list_splits_csv() {
        env::set_var("ZZZ_CSV_LIST", "one, two ,three");
        let list = env_list("ZZZ_CSV_LIST", &[]);
        assert_eq!(list, vec!["one".to_string(), "two".to_string(), "three".to_string()]);
        env::remove_var("ZZZ_CSV_LIST");
    }

    #[test]
    fn chroma_url_formats_host_and_port() {
        let mut cfg = Config::from_env();
        cfg.chroma_host = "chromadb".into();
        cfg.chroma_port = 8000;
        assert_eq!(cfg.chroma_url(), "http://chromadb:8000");
    }
}
