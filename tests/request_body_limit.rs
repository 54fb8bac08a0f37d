#[path = "common/mod.rs"]
mod common;

use axum::Router;
use bytes::Bytes;
use common::{ingest_request, router_with, send_json, EnvGuard, RecordingAnalyzer};
use http_body::Frame;
use http_body_util::StreamBody;
use logrelay::{app, build_state_from_env, AppConfig};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use std::convert::Infallible;
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::Mutex;
use tokio_stream::iter;

type GuardedHandle = (String, tokio::task::JoinHandle<()>);

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

async fn spawn_app() -> GuardedHandle {
    let listener = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = build_state_from_env().unwrap();
    let app: Router = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn chunked_payload_over_limit_returns_error_response() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    env.set_many(&[
        ("RELAY_MAX_REQUEST_BYTES", "256"),
        ("RELAY_CHAT_DISPATCH", "false"),
    ]);

    let (base, handle) = spawn_app().await;
    let url = format!("{}/ingest", base);

    let payload = "X".repeat(2048);
    let chunk_bytes: Vec<_> = payload
        .as_bytes()
        .chunks(128)
        .map(Bytes::copy_from_slice)
        .collect();

    let stream = iter(
        chunk_bytes
            .into_iter()
            .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk))),
    );
    let body = StreamBody::new(stream);
    let body = reqwest::Body::wrap(body);

    let client = Client::new();
    let resp = client
        .post(&url)
        .header("content-type", "text/plain")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json.get("errorCode").and_then(|v| v.as_i64()), Some(4130));
    assert_eq!(json["status"], "error");

    // Nothing was buffered for the rejected request.
    let probe: serde_json::Value = client
        .get(&url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(probe["bufferSize"], 0);
    assert_eq!(probe["maxRequestBytes"], 256);
    handle.abort();
}

#[tokio::test]
async fn declared_length_over_limit_is_rejected_in_process() {
    let config = AppConfig {
        max_request_bytes: Some(10),
        ..AppConfig::default()
    };
    let (app, state) = router_with(&config, RecordingAnalyzer::forwarding());
    let body = "this body is longer than ten bytes";
    let mut req = ingest_request("POST", body, Some("text/plain"), None);
    req.headers_mut()
        .insert("content-length", body.len().to_string().parse().unwrap());
    let (status, json) = send_json(&app, req).await;
    assert_eq!(status, axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["httpStatus"], 413);
    assert!(state.relay.buffer().is_empty());

    // A body under the limit still goes through.
    let (status, _) = send_json(&app, ingest_request("POST", "short", None, None)).await;
    assert_eq!(status, axum::http::StatusCode::OK);
}
