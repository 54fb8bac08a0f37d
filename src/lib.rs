//! Core library for logrelay.  This module wires the relay service object
//! into the HTTP surface: request/response structures, handlers and the
//! router.  Everything stateful lives in [`relay::Relay`].

pub mod analyzers;
pub mod buffer;
mod config;
pub mod dashboard;
pub mod metrics;
pub mod normalize;
pub mod relay;
pub mod results;
pub mod util;

pub use config::AppConfig;

use std::any::Any;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody},
    DefaultBodyLimit, Path, State,
};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::analyzers::{AnalysisResult, Analyzer};
use crate::normalize::PayloadFormat;
use crate::relay::{IngestError, IngestOutcome, Relay};
use crate::results::AnalysisStatus;

/// Advertised by the probe.  Unrecognized content types are read as text.
const ACCEPTED_CONTENT_TYPES: [&str; 3] = [
    "application/json",
    "application/x-ndjson",
    "text/plain",
];
const ACCEPTED_ENCODINGS: [&str; 3] = ["identity", "gzip", "x-gzip"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Error,
    Acknowledged,
}

/// Body returned by `POST /ingest`.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    pub records_received: usize,
    pub buffer_size: usize,
    pub format: PayloadFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    fn from_outcome(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Acknowledged { format, buffer_len } => Self {
                status: IngestStatus::Acknowledged,
                analysis_id: None,
                records_received: 0,
                buffer_size: buffer_len,
                format,
                attempts: None,
                latency_ms: None,
                result: None,
                message: Some("No log records in payload; nothing to analyze".to_string()),
                error: None,
            },
            IngestOutcome::Analyzed { format, record } => Self {
                status: match record.status {
                    AnalysisStatus::Error => IngestStatus::Error,
                    _ => IngestStatus::Success,
                },
                analysis_id: Some(record.id),
                records_received: record.records_received,
                buffer_size: record.context_records,
                format,
                attempts: Some(record.attempts),
                latency_ms: record.latency_ms,
                result: record.result,
                message: None,
                error: record.error,
            },
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

impl ErrorResponse {
    pub fn new(error_code: i32, http_status: u16, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            error_code,
            message: message.into(),
            http_status,
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    /// Maximum accepted raw request body size in bytes.  When unset the
    /// decoded payload ceiling is used instead.
    pub max_request_bytes: Option<usize>,
}

impl AppState {
    /// Raw body limit enforced by the router.
    pub fn body_limit(&self) -> usize {
        self.max_request_bytes
            .unwrap_or_else(|| self.relay.max_decoded_bytes())
    }

    /// State with the analyzer described by the configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            relay: Arc::new(Relay::from_config(config)?),
            max_request_bytes: config.max_request_bytes,
        })
    }

    /// State with an explicitly supplied analyzer.
    pub fn with_analyzer(config: &AppConfig, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            relay: Arc::new(Relay::new(config, analyzer)),
            max_request_bytes: config.max_request_bytes,
        }
    }
}

/// Build the application state from environment variables and the
/// optional analyzer configuration file.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        mode = config.analyzer.mode.as_str(),
        buffer_capacity = config.buffer_capacity,
        dispatch_timeout_ms = config.dispatch_timeout_ms,
        max_retries = config.retry.max_retries,
        max_request_bytes = ?config.max_request_bytes,
        max_context_chars = ?config.max_context_chars,
        "configuration loaded"
    );
    AppState::from_config(&config)
}

/// Build the Axum router and attach handlers.  The router holds a copy
/// of the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let body_limit = state.body_limit();

    let router = Router::new()
        .route(
            "/ingest",
            get(ingest_probe_handler)
                .post(ingest_handler)
                .put(ingest_handler),
        )
        .route("/results", get(results_handler))
        .route("/results/clear", post(clear_handler))
        .route("/results/:id", get(result_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return handle_body_rejection(&state, rejection),
    };
    let encoding = header_str(&headers, header::CONTENT_ENCODING);
    let content_type = header_str(&headers, header::CONTENT_TYPE);

    match state.relay.ingest(&body, encoding, content_type).await {
        Ok(outcome) => (StatusCode::OK, Json(IngestResponse::from_outcome(outcome))).into_response(),
        Err(IngestError::Decode(err)) => respond_with_error(ErrorResponse::new(
            4000,
            400,
            format!("Could not decode payload: {}", err),
        )),
        Err(IngestError::Internal(message)) => {
            respond_with_error(ErrorResponse::new(5000, 500, message))
        }
    }
}

fn handle_body_rejection(state: &AppState, rejection: BytesRejection) -> axum::response::Response {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            let limit = state.body_limit();
            tracing::warn!(limit, "request body exceeded configured limit");
            respond_with_error(ErrorResponse::new(
                4130,
                413,
                format!("Request too large (body exceeded limit {} bytes)", limit),
            ))
        }
        other => other.into_response(),
    }
}

/// Capability probe for shippers that test the endpoint with GET.
async fn ingest_probe_handler(State(state): State<AppState>) -> axum::response::Response {
    let relay = &state.relay;
    let json = serde_json::json!({
        "status": "ready",
        "methods": ["GET", "POST", "PUT"],
        "acceptedContentTypes": ACCEPTED_CONTENT_TYPES,
        "acceptedEncodings": ACCEPTED_ENCODINGS,
        "analyzerMode": relay.mode(),
        "bufferCapacity": relay.buffer().capacity(),
        "bufferSize": relay.buffer().len(),
        "maxRequestBytes": state.body_limit(),
        "maxDecodedBytes": relay.max_decoded_bytes(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn results_handler(State(state): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(state.relay.results().all())).into_response()
}

async fn result_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match state.relay.results().get(&id) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => respond_with_error(ErrorResponse::new(
            4040,
            404,
            format!("No analysis with id '{}'", id),
        )),
    }
}

async fn clear_handler(State(state): State<AppState>) -> axum::response::Response {
    let summary = state.relay.clear();
    let json = serde_json::json!({
        "status": "success",
        "message": "All results and buffered log records cleared",
        "resultsCleared": summary.results_cleared,
        "recordsCleared": summary.records_cleared,
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    let records = state.relay.results().newest_first();
    Html(dashboard::render(&records, &state.relay.gauges()))
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let relay = &state.relay;
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "analyzerMode": relay.mode(),
        "bufferSize": relay.buffer().len(),
        "bufferCapacity": relay.buffer().capacity(),
        "results": relay.results().len(),
        "failedResults": relay.results().count_by_status(AnalysisStatus::Error),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    let body = state.relay.metrics().render(&state.relay.gauges());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");
    respond_with_error(ErrorResponse::new(5000, 500, "Internal server error"))
}
