//! Google Gemini `generateContent` client

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::traits::{
    check_request, error_for_status, parse_retry_after, Completion, LLMProvider, ProviderError,
    ProviderResult,
};
use crate::config::ProviderKind;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API client
pub struct GoogleClient {
    name: String,
    api_key: String,
    base_url: String,
    http_client: Client,
}

impl GoogleClient {
    pub fn new(api_key: String) -> Self {
        Self {
            name: "google".to_string(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
        }
    }

    /// Create from environment variable
    pub fn from_env(var: &str) -> ProviderResult<Self> {
        let api_key = std::env::var(var)
            .map_err(|_| ProviderError::Config(format!("{} not set", var)))?;
        Ok(Self::new(api_key))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ProviderResult<Self> {
        self.http_client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Deserialize)]
struct GoogleError {
    error: GoogleErrorDetail,
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<GoogleErrorInfo>,
}

#[derive(Deserialize)]
struct GoogleErrorInfo {
    #[serde(default)]
    reason: Option<String>,
}

/// Gemini reports a bad key as 400 `INVALID_ARGUMENT` with reason
/// `API_KEY_INVALID`, so the body decides before the status code does.
fn google_error(status: StatusCode, headers: &HeaderMap, text: &str) -> ProviderError {
    let Ok(GoogleError { error }) = serde_json::from_str::<GoogleError>(text) else {
        return error_for_status(status, headers, format!("HTTP {}: {}", status.as_u16(), text));
    };

    let reasons = error
        .details
        .iter()
        .filter_map(|d| d.reason.as_deref())
        .chain(error.status.as_deref());
    let mut auth = false;
    let mut throttled = false;
    for reason in reasons {
        match reason {
            "API_KEY_INVALID" | "API_KEY_EXPIRED" | "UNAUTHENTICATED" | "PERMISSION_DENIED" => {
                auth = true
            }
            "RESOURCE_EXHAUSTED" | "RATE_LIMIT_EXCEEDED" => throttled = true,
            _ => {}
        }
    }

    if auth {
        ProviderError::Authentication {
            status: status.as_u16(),
            message: error.message,
        }
    } else if throttled {
        ProviderError::RateLimited {
            retry_after: parse_retry_after(headers),
            message: error.message,
        }
    } else {
        error_for_status(status, headers, error.message)
    }
}

#[async_trait]
impl LLMProvider for GoogleClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn ask(&self, model_id: &str, question_text: &str) -> ProviderResult<Completion> {
        check_request(model_id, question_text)?;

        let start = Instant::now();

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: question_text,
                }],
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/models/{}:generateContent", self.base_url, model_id))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(google_error(status, &headers, &text));
        }

        let api_response: GenerateResponse = response.json().await?;

        // Blocked prompts come back with a candidate but no content
        let text: String = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .ok_or_else(|| ProviderError::Malformed("No candidate content".to_string()))?;

        let (input_tokens, output_tokens) = api_response
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or((0, 0));

        Ok(Completion {
            text,
            model: api_response
                .model_version
                .unwrap_or_else(|| model_id.to_string()),
            input_tokens,
            output_tokens,
            latency_ms,
        })
    }
}
