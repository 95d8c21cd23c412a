use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// Error taxonomy surfaced by the core (spec section 7). Every outbound
/// adapter failure gets mapped into one of these before it crosses a
/// component boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("upstream connection failed: {0}")]
    Connection(String),

    #[error("upstream timed out after {0}s")]
    UpstreamTimeout(u64),

    #[error("upstream returned an error: {0}")]
    ApiError(String),

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("daily cost limit reached: {0}")]
    CostLimit(String),

    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error_type: &'static str,
    message: String,
}

impl AppError {
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::RateLimit { .. } => "rate_limit",
            AppError::Connection(_) => "connection",
            AppError::UpstreamTimeout(_) => "upstream_timeout",
            AppError::ApiError(_) => "api_error",
            AppError::Store(_) => "store_error",
            AppError::CostLimit(_) => "cost_limit",
            AppError::NotFound(_) => "not_found",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CostLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            status: "error",
            error_type: self.error_type(),
            message: self.to_string(),
        })
    }
}

/// Classification applied to raw LLM/embedding adapter failures, matching
/// the retry policy in spec section 5 (rate_limit/connection retryable,
/// auth/validation are not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    RateLimit,
    Connection,
    ApiError,
    Other,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpstreamErrorKind::RateLimit => "rate_limit",
            UpstreamErrorKind::Connection => "connection",
            UpstreamErrorKind::ApiError => "api_error",
            UpstreamErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> UpstreamErrorKind {
    if err.is_timeout() || err.is_connect() {
        UpstreamErrorKind::Connection
    } else if let Some(status) = err.status() {
        if status.as_u16() == 429 {
            UpstreamErrorKind::RateLimit
        } else if status.is_client_error() || status.is_server_error() {
            UpstreamErrorKind::ApiError
        } else {
            UpstreamErrorKind::Other
        }
    } else {
        UpstreamErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_map_to_expected_status() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("doc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RateLimit { retry_after_secs: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn error_type_strings_match_taxonomy() {
        assert_eq!(AppError::Store("x".into()).error_type(), "store_error");
        assert_eq!(AppError::CostLimit("x".into()).error_type(), "cost_limit");
    }
}
