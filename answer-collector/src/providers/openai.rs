//! OpenAI-compatible chat completions client
//!
//! Also serves DeepSeek and Together, which expose the same API under a
//! different base URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::traits::{
    check_request, error_for_status, Completion, LLMProvider, ProviderError, ProviderResult,
};
use crate::config::ProviderKind;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// OpenAI chat completions client
pub struct OpenAIClient {
    name: String,
    api_key: String,
    base_url: String,
    http_client: Client,
    max_tokens: u32,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: String) -> Self {
        Self {
            name: "openai".to_string(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create from environment variable
    pub fn from_env(var: &str) -> ProviderResult<Self> {
        let api_key = std::env::var(var)
            .map_err(|_| ProviderError::Config(format!("{} not set", var)))?;
        Ok(Self::new(api_key))
    }

    /// Set the configured provider name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set a request timeout on the underlying HTTP client
    pub fn with_timeout(mut self, timeout: Duration) -> ProviderResult<Self> {
        self.http_client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Output token limit for non-reasoning models
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Reasoning models spend output tokens on hidden reasoning, so no limit
/// is sent for them.
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl OpenAIErrorDetail {
    /// Billing exhaustion arrives as a 429 but will not clear by waiting
    fn is_insufficient_quota(&self) -> bool {
        let code_matches = self
            .code
            .as_ref()
            .and_then(|c| c.as_str())
            .is_some_and(|c| c == "insufficient_quota");
        self.error_type.as_deref() == Some("insufficient_quota")
            || code_matches
            || self.message.contains("exceeded your current quota")
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    async fn ask(&self, model_id: &str, question_text: &str) -> ProviderResult<Completion> {
        check_request(model_id, question_text)?;

        let start = Instant::now();

        let body = OpenAIRequest {
            model: model_id,
            messages: vec![OpenAIMessage {
                role: "user",
                content: question_text,
            }],
            max_tokens: if is_reasoning_model(model_id) {
                None
            } else {
                Some(self.max_tokens)
            },
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<OpenAIError>(&text).ok().map(|e| e.error);

            if status == 429 {
                if let Some(detail) = detail.as_ref().filter(|d| d.is_insufficient_quota()) {
                    return Err(ProviderError::QuotaExhausted(detail.message.clone()));
                }
            }

            let message = match detail {
                Some(detail) => detail.message,
                None => format!("HTTP {}: {}", status.as_u16(), text),
            };
            return Err(error_for_status(status, &headers, message));
        }

        let api_response: OpenAIResponse = response.json().await?;

        // A single choice is requested, so only the first one matters
        let text = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("No choices in response".to_string()))?
            .message
            .content
            .ok_or_else(|| ProviderError::Malformed("Choice has no content".to_string()))?;

        let (input_tokens, output_tokens) = api_response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(Completion {
            text,
            model: api_response.model.unwrap_or_else(|| model_id.to_string()),
            input_tokens,
            output_tokens,
            latency_ms,
        })
    }
}
