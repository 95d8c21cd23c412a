use crate::ai::provider::{cost_from_tokens, retry_with_backoff, ChatResponse, LLMProvider, LlmError};
use crate::error::{classify_reqwest_error, UpstreamErrorKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub struct OllamaProvider {
    base_url: String,
    client: Client,
    max_retries: u32,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
}

impl OllamaProvider {
    pub fn new(base_url: String, max_retries: u32, input_price_per_1m: f64, output_price_per_1m: f64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            max_retries,
            input_price_per_1m,
            output_price_per_1m,
        }
    }

    async fn call_once(&self, system: &str, user: &str, model: &str, max_tokens: u32, temperature: f32) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/api/generate", self.base_url);

        let full_prompt = if system.is_empty() {
            user.to_string()
        } else {
            format!("[SYSTEM]\n{}\n\n[USER]\n{}", system, user)
        };

        let payload = json!({
            "model": model,
            "prompt": full_prompt,
            "stream": false,
            "options": {
                "num_predict": max_tokens,
                "temperature": temperature
            }
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError { kind: classify_reqwest_error(&e), message: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError { kind: UpstreamErrorKind::ApiError, message: format!("ollama api error {}: {}", status, text) });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError { kind: UpstreamErrorKind::Other, message: e.to_string() })?;

        let text = body["response"]
            .as_str()
            .ok_or_else(|| LlmError { kind: UpstreamErrorKind::Other, message: format!("unparseable ollama response: {body:?}") })?
            .to_string();

        // Ollama reports counts in `prompt_eval_count`/`eval_count`, not the
        // `usage` shape the hosted providers use.
        let input_tokens = body["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
        let output_tokens = body["eval_count"].as_u64().unwrap_or(0) as u32;
        let cost = cost_from_tokens(input_tokens, output_tokens, self.input_price_per_1m, self.output_price_per_1m);

        Ok(ChatResponse { text, input_tokens, output_tokens, cost })
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, system: &str, user: &str, model: &str, max_tokens: u32, temperature: f32) -> Result<ChatResponse, LlmError> {
        retry_with_backoff(self.max_retries, || self.call_once(system, user, model, max_tokens, temperature)).await
    }
}
