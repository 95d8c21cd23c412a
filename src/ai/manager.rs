use crate::ai::anthropic::AnthropicProvider;
use crate::ai::gemini::GeminiProvider;
use crate::ai::ollama::OllamaProvider;
use crate::ai::openai::OpenAIProvider;
use crate::ai::provider::{ChatResponse, LLMProvider, LlmError};
use crate::config::Config;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
}

/// Holds the active `LLMProvider` behind a swappable lock, generalizing
/// the teacher's `AIManager` beyond its original Gemini/Ollama pairing.
pub struct LLMManager {
    provider: RwLock<Arc<dyn LLMProvider>>,
}

impl LLMManager {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider: RwLock::new(provider) }
    }

    pub fn from_config(cfg: &Config, kind: ProviderKind, api_key: String, ollama_base_url: String) -> Self {
        Self::new(build_provider(cfg, kind, api_key, ollama_base_url))
    }

    pub async fn switch_provider(&self, provider: Arc<dyn LLMProvider>) {
        let mut guard = self.provider.write().await;
        *guard = provider;
    }

    pub async fn current_provider_name(&self) -> String {
        self.provider.read().await.name().to_string()
    }
}

pub fn build_provider(cfg: &Config, kind: ProviderKind, api_key: String, ollama_base_url: String) -> Arc<dyn LLMProvider> {
    match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key, cfg.max_retries, cfg.input_price_per_1m, cfg.output_price_per_1m)),
        ProviderKind::OpenAi => Arc::new(OpenAIProvider::new(api_key, cfg.max_retries, cfg.input_price_per_1m, cfg.output_price_per_1m)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(api_key, cfg.max_retries, cfg.input_price_per_1m, cfg.output_price_per_1m)),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(ollama_base_url, cfg.max_retries, cfg.input_price_per_1m, cfg.output_price_per_1m)),
    }
}

#[async_trait]
impl LLMProvider for LLMManager {
    fn name(&self) -> &str {
        "llm-manager"
    }

    async fn chat(&self, system: &str, user: &str, model: &str, max_tokens: u32, temperature: f32) -> Result<ChatResponse, LlmError> {
        let provider = self.provider.read().await.clone();
        provider.chat(system, user, model, max_tokens, temperature).await
    }
}
