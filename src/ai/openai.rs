use crate::ai::provider::{cost_from_tokens, retry_with_backoff, ChatResponse, LLMProvider, LlmError};
use crate::error::{classify_reqwest_error, UpstreamErrorKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub struct OpenAIProvider {
    api_key: String,
    client: Client,
    max_retries: u32,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
}

impl OpenAIProvider {
    pub fn new(api_key: String, max_retries: u32, input_price_per_1m: f64, output_price_per_1m: f64) -> Self {
        Self {
            api_key,
            client: Client::new(),
            max_retries,
            input_price_per_1m,
            output_price_per_1m,
        }
    }

    async fn call_once(&self, system: &str, user: &str, model: &str, max_tokens: u32, temperature: f32) -> Result<ChatResponse, LlmError> {
        let url = "https://api.openai.com/v1/chat/completions";

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": user }));

        let payload = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature
        });

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError { kind: classify_reqwest_error(&e), message: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let kind = if status.as_u16() == 429 { UpstreamErrorKind::RateLimit } else { UpstreamErrorKind::ApiError };
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError { kind, message: format!("openai api error {}: {}", status, text) });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError { kind: UpstreamErrorKind::Other, message: e.to_string() })?;

        let text = body["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| LlmError { kind: UpstreamErrorKind::Other, message: format!("unparseable openai response: {body:?}") })?
            .to_string();

        let input_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let cost = cost_from_tokens(input_tokens, output_tokens, self.input_price_per_1m, self.output_price_per_1m);

        Ok(ChatResponse { text, input_tokens, output_tokens, cost })
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, system: &str, user: &str, model: &str, max_tokens: u32, temperature: f32) -> Result<ChatResponse, LlmError> {
        retry_with_backoff(self.max_retries, || self.call_once(system, user, model, max_tokens, temperature)).await
    }
}
