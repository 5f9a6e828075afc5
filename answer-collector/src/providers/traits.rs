//! Provider trait and shared error taxonomy for LLM API clients

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProviderKind;

/// Plain answer text extracted from a provider response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
}

/// How the collector reacts to a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad or exhausted credentials; stops the whole provider
    Authentication,
    /// Throttled; retried after governor backoff
    RateLimited,
    /// Connection trouble or server-side fault; retried with short backoff
    TransientNetwork,
    /// Response could not be understood; retried once
    MalformedResponse,
    /// Request will never succeed; the pair fails
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Authentication => "authentication",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::TransientNetwork => "transient_network",
            ErrorClass::MalformedResponse => "malformed_response",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Collapse the provider-specific failure onto the shared taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http(e) if e.is_decode() => ErrorClass::MalformedResponse,
            Self::Http(e) if e.is_builder() => ErrorClass::Permanent,
            Self::Http(_) => ErrorClass::TransientNetwork,
            Self::Authentication { .. } | Self::QuotaExhausted(_) | Self::Config(_) => {
                ErrorClass::Authentication
            }
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Api { status, .. } if is_transient_status(*status) => {
                ErrorClass::TransientNetwork
            }
            Self::Api { .. } => ErrorClass::Permanent,
            Self::Timeout { .. } => ErrorClass::TransientNetwork,
            Self::Malformed(_) => ErrorClass::MalformedResponse,
            Self::Unsupported(_) => ErrorClass::Permanent,
        }
    }

    /// Server-provided wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 408, 425, 5xx and Anthropic's 529 "overloaded" are worth another try
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 500..=599)
}

/// Map a non-success HTTP status onto the shared taxonomy.
///
/// Adapters call this after pulling the provider's own error message out
/// of the body.
pub(crate) fn error_for_status(
    status: StatusCode,
    headers: &HeaderMap,
    message: String,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication {
            status: status.as_u16(),
            message,
        },
        429 => ProviderError::RateLimited {
            retry_after: parse_retry_after(headers),
            message,
        },
        code => ProviderError::Api {
            status: code,
            message,
        },
    }
}

/// Parse a `retry-after` header given in seconds
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Reject requests that can never succeed before touching the network
pub(crate) fn check_request(model_id: &str, question_text: &str) -> ProviderResult<()> {
    if question_text.trim().is_empty() {
        return Err(ProviderError::Unsupported("question text is empty".to_string()));
    }
    if model_id.trim().is_empty() {
        return Err(ProviderError::Unsupported("model id is empty".to_string()));
    }
    Ok(())
}

/// Trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Configured provider name (e.g., "openai", "together")
    fn name(&self) -> &str;

    /// Wire protocol this client speaks
    fn kind(&self) -> ProviderKind;

    /// Send one question to one model.
    ///
    /// Makes exactly one HTTP request and never retries internally; retry
    /// policy belongs to the caller.
    async fn ask(&self, model_id: &str, question_text: &str) -> ProviderResult<Completion>;
}
