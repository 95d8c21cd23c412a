use crate::ai::provider::{cost_from_tokens, retry_with_backoff, ChatResponse, LLMProvider, LlmError};
use crate::error::{classify_reqwest_error, UpstreamErrorKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub struct GeminiProvider {
    api_key: String,
    client: Client,
    max_retries: u32,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
}

impl GeminiProvider {
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
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        );

        // Gemini's REST surface has no separate system role on this API
        // version; fold it into the leading part of the prompt like the
        // teacher's implementation did.
        let full_prompt = if system.is_empty() {
            user.to_string()
        } else {
            format!("SYSTEM:\n{}\n\nUSER:\n{}", system, user)
        };

        let payload = json!({
            "contents": [{ "parts": [{ "text": full_prompt }] }],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
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
            let kind = if status.as_u16() == 429 { UpstreamErrorKind::RateLimit } else { UpstreamErrorKind::ApiError };
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError { kind, message: format!("gemini api error {}: {}", status, text) });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError { kind: UpstreamErrorKind::Other, message: e.to_string() })?;

        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError { kind: UpstreamErrorKind::Other, message: format!("unparseable gemini response: {body:?}") })?
            .to_string();

        let input_tokens = body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32;
        let output_tokens = body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
        let cost = cost_from_tokens(input_tokens, output_tokens, self.input_price_per_1m, self.output_price_per_1m);

        Ok(ChatResponse { text, input_tokens, output_tokens, cost })
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, system: &str, user: &str, model: &str, max_tokens: u32, temperature: f32) -> Result<ChatResponse, LlmError> {
        retry_with_backoff(self.max_retries, || self.call_once(system, user, model, max_tokens, temperature)).await
    }
}
