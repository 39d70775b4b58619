// End-to-end tests for the chat API, driving the router in-process.
// The upstream completion service is replaced by a mockito server.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use portfolio_chat::{config::Config, server};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Config pointing the OpenAI provider at `base_url` with a dummy key
fn config_with_upstream(base_url: &str) -> Config {
    let mut config = Config::default();
    config.openai.api_key = Some("sk-test".to_string());
    config.openai.base_url = base_url.to_string();
    config
}

fn app(config: Config) -> Router {
    let (state, _limiter) = server::build_state(config).unwrap();
    server::http::build_router(state)
}

fn chat_request(client: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn mock_completion(server: &mut mockito::ServerGuard, reply: &str) -> mockito::Mock {
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "model": "gpt-3.5-turbo",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": reply},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 40, "completion_tokens": 8, "total_tokens": 48}
            })
            .to_string(),
        )
}

#[tokio::test]
async fn test_first_message_gets_reply_and_nineteen_remaining() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = mock_completion(&mut upstream, "Hi! Ask me anything about Yijun.")
        .match_body(mockito::Matcher::Regex("portfolio website".to_string()))
        .expect(1)
        .create_async()
        .await;
    let app = app(config_with_upstream(&upstream.url()));

    let (status, body) = send(&app, chat_request("203.0.113.1", json!({"message": "Hello"}))).await;

    mock.assert_async().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Hi! Ask me anything about Yijun.");
    assert_eq!(body["remaining"], 19);
}

#[tokio::test]
async fn test_twenty_first_request_is_rate_limited() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = mock_completion(&mut upstream, "ok")
        .expect(21)
        .create_async()
        .await;
    let app = app(config_with_upstream(&upstream.url()));

    for expected in (0..20).rev() {
        let (status, body) = send(&app, chat_request("203.0.113.2", json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remaining"], expected);
    }

    let (status, body) = send(&app, chat_request("203.0.113.2", json!({"message": "hi"}))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["isRateLimited"], true);
    assert!(body["error"].as_str().unwrap().contains("limit"));

    // A different client still has its full budget.
    let (status, body) = send(&app, chat_request("203.0.113.3", json!({"message": "hi"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining"], 19);

    // Twenty calls for the first client plus one for the second.
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_message_is_rejected_before_upstream() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = mock_completion(&mut upstream, "unused")
        .expect(0)
        .create_async()
        .await;
    let app = app(config_with_upstream(&upstream.url()));

    let (status, body) = send(&app, chat_request("203.0.113.4", json!({"message": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message is required");
    assert!(body.get("isRateLimited").is_none());

    let (status, _) = send(&app, chat_request("203.0.113.4", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_message_length_boundary() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = mock_completion(&mut upstream, "fine").create_async().await;
    let app = app(config_with_upstream(&upstream.url()));

    let (status, _) = send(&app, chat_request("203.0.113.5", json!({"message": "a".repeat(500)}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, chat_request("203.0.113.5", json!({"message": "a".repeat(501)}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message is too long (maximum 500 characters)");
}

#[tokio::test]
async fn test_missing_api_key_is_configuration_error() {
    let app = app(Config::default());

    let (status, body) = send(&app, chat_request("203.0.113.6", json!({"message": "Hello"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "OpenAI API key is not configured.");
}

#[tokio::test]
async fn test_upstream_error_is_not_leaked() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body(r#"{"error":{"message":"You exceeded your current quota, org-secret123"}}"#)
        .create_async()
        .await;
    let app = app(config_with_upstream(&upstream.url()));

    let (status, body) = send(&app, chat_request("203.0.113.7", json!({"message": "Hello"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to process chat message.");
    assert!(!body.to_string().contains("org-secret123"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = app(Config::default());

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request body");
}

#[tokio::test]
async fn test_requests_without_address_share_unknown_key() {
    let mut config = Config::default();
    config.rate_limiting.max_calls = 1;
    let app = app(config);

    let anonymous = || {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(json!({"message": "Hello"}).to_string()))
            .unwrap()
    };

    // First call is admitted, then fails the credential check.
    let (status, _) = send(&app, anonymous()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, body) = send(&app, anonymous()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["isRateLimited"], true);
}

#[tokio::test]
async fn test_health_reports_upstream_state() {
    let app = app(Config::default());

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["upstream_configured"], false);
    assert!(body["model"].is_null());
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() {
    let app = app(Config::default());
    let _ = send(&app, chat_request("203.0.113.8", json!({"message": ""}))).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("portfolio_chat_requests_total"));
}
