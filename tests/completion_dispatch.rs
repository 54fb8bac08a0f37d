#[path = "common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use common::{ingest_request, send_json};
use logrelay::analyzers::{AnalyzerMode, RetryPolicy};
use logrelay::{app, AppConfig, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const REPLY: &str = "**THREAT LEVEL:** HIGH\n\
RISK SCORE: 8/10\n\
SUMMARY: Repeated authentication failures from one host.\n\
KEY FINDINGS:\n- 40 failed logins\n- source 10.0.0.7\n\
IMMEDIATE ACTIONS: Block 10.0.0.7\n\
RECOMMENDATIONS: Enable MFA";

#[derive(Clone)]
struct Mock {
    calls: Arc<AtomicU32>,
    fail_first: u32,
    delay: Duration,
}

// Gemini-style completion endpoint.  Fails the first `fail_first` calls with
// 503 and rejects requests without the expected API key.
async fn start_completion_api(fail_first: u32, delay: Duration) -> (String, Arc<AtomicU32>, JoinHandle<()>) {
    async fn generate(
        State(mock): State<Mock>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let n = mock.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(mock.delay).await;
        if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no key"})));
        }
        if n < mock.fail_first {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})));
        }
        let prompt = body
            .pointer("/contents/0/parts/0/text")
            .and_then(Value::as_str)
            .unwrap_or("");
        assert!(prompt.contains("THREAT LEVEL:"));
        (
            StatusCode::OK,
            Json(json!({"candidates": [{"content": {"parts": [{"text": REPLY}]}}]})),
        )
    }
    let calls = Arc::new(AtomicU32::new(0));
    let mock = Mock {
        calls: calls.clone(),
        fail_first,
        delay,
    };
    let router = Router::new()
        .route("/v1/generate", post(generate))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}/v1/generate", addr), calls, handle)
}

fn completion_config(url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.analyzer.mode = AnalyzerMode::Completion;
    config.analyzer.completion.url = url.to_string();
    config.analyzer.completion.api_key = Some("secret".to_string());
    config.dispatch_timeout_ms = 2_000;
    config
}

#[tokio::test]
async fn structured_reply_is_parsed_into_fields() {
    let (url, calls, _api) = start_completion_api(0, Duration::ZERO).await;
    let app = app(AppState::from_config(&completion_config(&url)).unwrap());

    let (status, json) = send_json(
        &app,
        ingest_request("POST", "auth failure user=root", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    let result = &json["result"];
    assert_eq!(result["kind"], "structured");
    assert_eq!(result["threatLevel"], "HIGH");
    assert_eq!(result["riskScore"], "8/10");
    assert_eq!(
        result["summary"],
        "Repeated authentication failures from one host."
    );
    assert_eq!(result["keyFindings"], "- 40 failed logins\n- source 10.0.0.7");
    assert_eq!(result["immediateActions"], "Block 10.0.0.7");
    assert_eq!(result["recommendations"], "Enable MFA");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried_when_configured() {
    let (url, calls, _api) = start_completion_api(1, Duration::ZERO).await;
    let mut config = completion_config(&url);
    config.retry = RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(10),
    };
    let app = app(AppState::from_config(&config).unwrap());

    let (_, json) = send_json(&app, ingest_request("POST", "x", None, None)).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["attempts"], 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn server_error_without_retry_is_recorded() {
    let (url, calls, _api) = start_completion_api(5, Duration::ZERO).await;
    let app = app(AppState::from_config(&completion_config(&url)).unwrap());

    let (status, json) = send_json(&app, ingest_request("POST", "x", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().unwrap().contains("HTTP 503"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_collaborator_times_out() {
    let (url, _calls, _api) = start_completion_api(0, Duration::from_secs(5)).await;
    let mut config = completion_config(&url);
    config.dispatch_timeout_ms = 100;
    let state = AppState::from_config(&config).unwrap();
    let app = app(state.clone());

    let (status, json) = send_json(&app, ingest_request("POST", "x", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().unwrap().contains("timed out"));
    let id = json["analysisId"].as_str().unwrap();
    let record = state.relay.results().get(id).unwrap();
    assert!(record.latency_ms.unwrap() < 5_000);
}
