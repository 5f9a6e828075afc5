//! HTTP status and body mapping of each provider adapter against a mock server.

use std::sync::Arc;
use std::time::Duration;

use answer_collector::providers::{
    AnthropicClient, ErrorClass, GoogleClient, LLMProvider, OpenAIClient, ProviderError,
};
use answer_collector::config::ModelConfig;
use answer_collector::questions::{Question, QuestionSet};
use answer_collector::runner::{Collector, CollectorConfig, GovernorConfig, NoOpProgress};
use answer_collector::store::FileAnswerStore;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn openai(server: &MockServer) -> OpenAIClient {
    OpenAIClient::new("sk-test".into())
        .with_base_url(server.uri())
        .with_timeout(Duration::from_secs(5))
        .unwrap()
}

async fn mount_chat(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn openai_parses_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{ "message": { "role": "assistant", "content": "Tacos." } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 2 }
        })))
        .mount(&server)
        .await;

    let completion = openai(&server)
        .await
        .ask("gpt-4o", "Tacos or pizza?")
        .await
        .unwrap();
    assert_eq!(completion.text, "Tacos.");
    assert_eq!(completion.model, "gpt-4o-2024-08-06");
    assert_eq!(completion.input_tokens, 12);
    assert_eq!(completion.output_tokens, 2);
}

#[tokio::test]
async fn openai_401_is_authentication() {
    let server = MockServer::start().await;
    mount_chat(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
        })),
    )
    .await;

    let err = openai(&server).await.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Authentication);
    assert!(err.to_string().contains("Incorrect API key"));
}

#[tokio::test]
async fn openai_429_carries_retry_after() {
    let server = MockServer::start().await;
    mount_chat(
        &server,
        ResponseTemplate::new(429)
            .insert_header("retry-after", "7")
            .set_body_json(json!({
                "error": { "message": "Rate limit reached", "type": "requests" }
            })),
    )
    .await;

    let err = openai(&server).await.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::RateLimited);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn openai_insufficient_quota_stops_provider() {
    let server = MockServer::start().await;
    mount_chat(
        &server,
        ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "message": "You exceeded your current quota",
                "type": "insufficient_quota",
                "code": "insufficient_quota"
            }
        })),
    )
    .await;

    let err = openai(&server).await.ask("gpt-4o", "hi").await.unwrap_err();
    assert!(matches!(err, ProviderError::QuotaExhausted(_)));
    assert_eq!(err.class(), ErrorClass::Authentication);
}

#[tokio::test]
async fn openai_server_errors_are_transient_and_400_is_permanent() {
    let server = MockServer::start().await;
    mount_chat(&server, ResponseTemplate::new(503).set_body_string("upstream down")).await;
    let err = openai(&server).await.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransientNetwork);

    let server = MockServer::start().await;
    mount_chat(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "model not found", "type": "invalid_request_error" }
        })),
    )
    .await;
    let err = openai(&server).await.ask("no-such-model", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Permanent);
}

#[tokio::test]
async fn openai_malformed_bodies() {
    let server = MockServer::start().await;
    mount_chat(&server, ResponseTemplate::new(200).set_body_string("not json")).await;
    let err = openai(&server).await.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::MalformedResponse);

    let server = MockServer::start().await;
    mount_chat(&server, ResponseTemplate::new(200).set_body_json(json!({ "choices": [] }))).await;
    let err = openai(&server).await.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::MalformedResponse);
}

#[tokio::test]
async fn openai_client_timeout_is_transient() {
    let server = MockServer::start().await;
    mount_chat(
        &server,
        ResponseTemplate::new(200)
            .set_delay(Duration::from_secs(2))
            .set_body_json(json!({ "choices": [{ "message": { "content": "late" } }] })),
    )
    .await;

    let client = OpenAIClient::new("sk-test".into())
        .with_base_url(server.uri())
        .with_timeout(Duration::from_millis(100))
        .unwrap();
    let err = client.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransientNetwork);
}

#[tokio::test]
async fn anthropic_joins_text_blocks_and_maps_overload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                { "type": "text", "text": "Pizza" },
                { "type": "text", "text": ", obviously." }
            ],
            "usage": { "input_tokens": 9, "output_tokens": 4 }
        })))
        .mount(&server)
        .await;

    let client = AnthropicClient::new("sk-ant-test".into()).with_base_url(server.uri());
    let completion = client
        .ask("claude-3-5-sonnet-20241022", "Tacos or pizza?")
        .await
        .unwrap();
    assert_eq!(completion.text, "Pizza, obviously.");
    assert_eq!(completion.output_tokens, 4);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        })))
        .mount(&server)
        .await;

    let client = AnthropicClient::new("sk-ant-test".into()).with_base_url(server.uri());
    let err = client.ask("claude-3-5-sonnet-20241022", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransientNetwork);
    assert!(err.to_string().contains("Overloaded"));
}

#[tokio::test]
async fn anthropic_without_text_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": [] })))
        .mount(&server)
        .await;

    let client = AnthropicClient::new("sk-ant-test".into()).with_base_url(server.uri());
    let err = client.ask("claude-3-5-sonnet-20241022", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::MalformedResponse);
}

#[tokio::test]
async fn google_parses_candidates_and_maps_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Tacos" }], "role": "model" } }],
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 1 },
            "modelVersion": "gemini-2.0-flash-001"
        })))
        .mount(&server)
        .await;

    let client = GoogleClient::new("g-test".into()).with_base_url(server.uri());
    let completion = client.ask("gemini-2.0-flash", "Tacos or pizza?").await.unwrap();
    assert_eq!(completion.text, "Tacos");
    assert_eq!(completion.input_tokens, 5);
    assert_eq!(completion.model, "gemini-2.0-flash-001");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" }
        })))
        .mount(&server)
        .await;

    let client = GoogleClient::new("bad".into()).with_base_url(server.uri());
    let err = client.ask("gemini-2.0-flash", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Authentication);
}

fn gemini_bad_key() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": {
            "code": 400,
            "message": "API key not valid. Please pass a valid API key.",
            "status": "INVALID_ARGUMENT",
            "details": [{
                "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                "reason": "API_KEY_INVALID",
                "domain": "googleapis.com"
            }]
        }
    }))
}

#[tokio::test]
async fn google_invalid_key_400_is_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .respond_with(gemini_bad_key())
        .mount(&server)
        .await;

    let client = GoogleClient::new("bad".into()).with_base_url(server.uri());
    let err = client.ask("gemini-2.0-flash", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Authentication);
    assert!(err.to_string().contains("API key not valid"));
}

#[tokio::test]
async fn google_invalid_key_stops_the_provider_after_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .respond_with(gemini_bad_key())
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileAnswerStore::open(dir.path()).unwrap());
    let client = Arc::new(GoogleClient::new("bad".into()).with_base_url(server.uri()));
    let questions = QuestionSet::new(
        (1..=5)
            .map(|i| Question::with_id(format!("q{}", i), format!("Question {}?", i)))
            .collect(),
    )
    .unwrap();
    let config = CollectorConfig {
        max_attempts: 3,
        transient_backoff: Duration::from_millis(10),
        transient_backoff_max: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
    };
    let governor = GovernorConfig {
        max_in_flight: 1,
        ..GovernorConfig::default()
    };

    let summary = Collector::new(store, config)
        .with_progress(Arc::new(NoOpProgress))
        .with_provider(client, governor)
        .run(&questions, &[ModelConfig::new("gemini-2.0-flash", "google")])
        .await
        .unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    let model = summary.model("gemini-2.0-flash").unwrap();
    assert_eq!(model.failed[&ErrorClass::Authentication], 1);
    assert_eq!(model.aborted, 4);
}

#[tokio::test]
async fn google_blocked_prompt_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        })))
        .mount(&server)
        .await;

    let client = GoogleClient::new("g-test".into()).with_base_url(server.uri());
    let err = client.ask("gemini-2.0-flash", "hi").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::MalformedResponse);
}

#[tokio::test]
async fn empty_question_never_reaches_the_network() {
    let server = MockServer::start().await;
    mount_chat(&server, ResponseTemplate::new(200)).await;

    let err = openai(&server).await.ask("gpt-4o", "   ").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Permanent);
    assert!(server.received_requests().await.unwrap().is_empty());
}
