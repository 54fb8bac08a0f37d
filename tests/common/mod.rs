#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use logrelay::analyzers::{AnalysisResult, Analyzer, AnalyzerMode, DispatchError};
use logrelay::{app, AppConfig, AppState};
use tower::ServiceExt; // for oneshot

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// In-process analyzer that remembers every prompt it was handed.
pub struct RecordingAnalyzer {
    pub prompts: Mutex<Vec<String>>,
    reply: Result<AnalysisResult, DispatchError>,
}

impl RecordingAnalyzer {
    pub fn forwarding() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Ok(AnalysisResult::Forwarded {
                url: "http://chat.local/?prompt=x".to_string(),
                dispatch_status: Some(200),
            }),
        })
    }

    pub fn failing(error: DispatchError) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Err(error),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Analyzer for RecordingAnalyzer {
    fn mode(&self) -> AnalyzerMode {
        AnalyzerMode::ChatUrl
    }

    async fn analyze(&self, prompt: &str) -> Result<AnalysisResult, DispatchError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone()
    }
}

pub fn router_with(config: &AppConfig, analyzer: Arc<dyn Analyzer>) -> (Router, AppState) {
    let state = AppState::with_analyzer(config, analyzer);
    (app(state.clone()), state)
}

pub fn ingest_request(
    method: &str,
    body: impl Into<Body>,
    content_type: Option<&str>,
    content_encoding: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri("/ingest");
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    if let Some(enc) = content_encoding {
        builder = builder.header("content-encoding", enc);
    }
    builder.body(body.into()).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

pub async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}
