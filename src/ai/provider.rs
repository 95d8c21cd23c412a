//! LLM provider contract (spec section 6). The teacher's own
//! `AIProvider` trait declares `ask(&self, prompt, context)` but
//! `anthropic.rs`/`openai.rs` actually implement `ask(&self, history,
//! system_prompt)` while `gemini.rs`/`ollama.rs` implement the signature
//! as declared — three shapes behind one trait. This rewrite settles on a
//! single signature covering what the RAG pipeline and enrichment
//! orchestrator need: a system/user pair, a model override, a token
//! budget, and a temperature, returning token counts and an estimated
//! cost.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::UpstreamErrorKind;

#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
}

#[derive(Debug)]
pub struct LlmError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn retryable(&self) -> bool {
        matches!(self.kind, UpstreamErrorKind::RateLimit | UpstreamErrorKind::Connection)
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        system: &str,
        user: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ChatResponse, LlmError>;
}

pub fn cost_from_tokens(
    input_tokens: u32,
    output_tokens: u32,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
) -> f64 {
    (input_tokens as f64 / 1_000_000.0) * input_price_per_1m
        + (output_tokens as f64 / 1_000_000.0) * output_price_per_1m
}

/// Exponential backoff retry wrapper shared by every provider impl. Only
/// `rate_limit` and `connection` failures are retried (spec section 5);
/// `api_error` (auth/validation-shaped) fails fast.
pub async fn retry_with_backoff<F, Fut>(max_retries: u32, mut attempt: F) -> Result<ChatResponse, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ChatResponse, LlmError>>,
{
    let mut last_err = None;
    for attempt_no in 0..=max_retries {
        match attempt().await {
            Ok(resp) => return Ok(resp),
            Err(err) => {
                if !err.retryable() || attempt_no == max_retries {
                    return Err(err);
                }
                let backoff_ms = 200u64 * (1u64 << attempt_no.min(6));
                log::warn!("llm call failed ({}), retrying in {}ms", err, backoff_ms);
                last_err = Some(err);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
    Err(last_err.unwrap_or(LlmError {
        kind: UpstreamErrorKind::Other,
        message: "retry loop exhausted without an error".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_from_tokens_scales_linearly() {
        let cost = cost_from_tokens(1_000_000, 0, 0.15, 0.60);
        assert!((cost - 0.15).abs() < 1e-9);
        let cost2 = cost_from_tokens(0, 1_000_000, 0.15, 0.60);
        assert!((cost2 - 0.60).abs() < 1e-9);
    }

    #[test]
    fn retryable_kinds_are_rate_limit_and_connection() {
        let e1 = LlmError { kind: UpstreamErrorKind::RateLimit, message: "x".into() };
        let e2 = LlmError { kind: UpstreamErrorKind::ApiError, message: "x".into() };
        assert!(e1.retryable());
        assert!(!e2.retryable());
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_on_non_retryable() {
        let mut calls = 0;
        let result = retry_with_backoff(3, || {
            calls += 1;
            async move {
                Err::<ChatResponse, LlmError>(LlmError {
                    kind: UpstreamErrorKind::ApiError,
                    message: "bad request".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_with_backoff_retries_connection_errors() {
        let mut calls = 0;
        let result = retry_with_backoff(2, || {
            calls += 1;
            async move {
                if calls < 2 {
                    Err(LlmError { kind: UpstreamErrorKind::Connection, message: "down".into() })
                } else {
                    Ok(ChatResponse { text: "ok".into(), input_tokens: 1, output_tokens: 1, cost: 0.0 })
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }
}
