//! The relay service object.
//!
//! Owns the context buffer, the result store, the dispatcher and the
//! counters.  One instance is created at startup and shared by every
//! handler through `AppState`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::analyzers::prompt::{self, PromptInput};
use crate::analyzers::{Analyzer, AnalyzerMode, DispatchReport, Dispatcher};
use crate::buffer::{ContextBuffer, LogRecord};
use crate::config::AppConfig;
use crate::metrics::{Gauges, RelayMetrics};
use crate::normalize::{NormalizeError, Normalizer, PayloadFormat};
use crate::results::{AnalysisRecord, AnalysisStatus, ResultStore};
use crate::util::preview;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] NormalizeError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// What happened to one ingest.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Nothing to analyze; the buffer was not touched.
    Acknowledged {
        format: PayloadFormat,
        buffer_len: usize,
    },
    Analyzed {
        format: PayloadFormat,
        record: AnalysisRecord,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSummary {
    pub results_cleared: usize,
    pub records_cleared: usize,
}

pub struct Relay {
    normalizer: Normalizer,
    buffer: ContextBuffer,
    results: Arc<ResultStore>,
    dispatcher: Dispatcher,
    metrics: Arc<RelayMetrics>,
    preview_chars: usize,
    max_context_chars: Option<usize>,
}

impl Relay {
    /// Build a relay around an explicit analyzer.
    pub fn new(config: &AppConfig, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            normalizer: Normalizer::new(config.max_decoded_bytes),
            buffer: ContextBuffer::new(config.buffer_capacity),
            results: Arc::new(ResultStore::new()),
            dispatcher: Dispatcher::new(analyzer, config.dispatch_timeout(), config.retry),
            metrics: Arc::new(RelayMetrics::new()),
            preview_chars: config.preview_chars,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Build a relay with the analyzer described by `config.analyzer`.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let analyzer = config.analyzer.build(config.dispatch_timeout())?;
        Ok(Self::new(config, analyzer))
    }

    pub fn buffer(&self) -> &ContextBuffer {
        &self.buffer
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn mode(&self) -> AnalyzerMode {
        self.dispatcher.mode()
    }

    pub fn max_decoded_bytes(&self) -> usize {
        self.normalizer.max_decoded_bytes()
    }

    pub fn gauges(&self) -> Gauges {
        Gauges {
            buffer_records: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            results: self.results.len(),
        }
    }

    /// Normalize one request body, fold it into the context window and run
    /// the analysis.  Dispatch failures are recorded on the returned
    /// `AnalysisRecord`; only decode failures and internal faults are errors.
    pub async fn ingest(
        &self,
        body: &[u8],
        content_encoding: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<IngestOutcome, IngestError> {
        let normalized = match self
            .normalizer
            .normalize(body, content_encoding, content_type)
        {
            Ok(n) => n,
            Err(err) => {
                self.metrics.record_decode_error();
                tracing::info!(error = %err, bytes = body.len(), "rejecting undecodable payload");
                return Err(err.into());
            }
        };
        let format = normalized.format;
        if normalized.is_empty() {
            self.metrics.record_acknowledged();
            tracing::debug!(?format, bytes = body.len(), "empty payload acknowledged");
            return Ok(IngestOutcome::Acknowledged {
                format,
                buffer_len: self.buffer.len(),
            });
        }

        let received = normalized.record_count();
        tracing::debug!(
            ?format,
            records = received,
            decompressed = normalized.decompressed,
            decoded_bytes = normalized.decoded_bytes,
            "payload normalized"
        );
        let window = self
            .buffer
            .append_and_snapshot(LogRecord::batch(normalized.records, Utc::now()));
        self.metrics.record_ingest(received);
        let context = window.join("\n");

        let record = AnalysisRecord::processing(
            Uuid::new_v4().to_string(),
            self.dispatcher.mode(),
            received,
            window.len(),
            preview(&context, self.preview_chars),
        );
        self.results.insert(record.clone());

        let prompt = prompt::render(
            &PromptInput {
                analysis_id: &record.id,
                timestamp: record.created_at,
                record_count: window.len(),
                context: &context,
            },
            self.dispatcher.instructions(),
            self.max_context_chars,
        );

        // The analysis task owns the record from here on: dispatch and the
        // final store both happen there, so a caller that goes away mid-flight
        // still leaves a finished record behind.
        let dispatcher = self.dispatcher.clone();
        let results = Arc::clone(&self.results);
        let metrics = Arc::clone(&self.metrics);
        let analysis = tokio::spawn(async move {
            let joined = tokio::spawn(async move { dispatcher.dispatch(&prompt).await }).await;
            finish_analysis(record, joined, &results, &metrics)
        });

        match analysis.await {
            Ok(Ok(record)) => Ok(IngestOutcome::Analyzed { format, record }),
            Ok(Err(message)) => Err(IngestError::Internal(message)),
            Err(join_err) => {
                tracing::error!(error = %join_err, "analysis task failed");
                Err(IngestError::Internal("analysis task failed".to_string()))
            }
        }
    }

    /// Drop every stored result and buffered record.
    pub fn clear(&self) -> ClearSummary {
        let summary = ClearSummary {
            results_cleared: self.results.clear(),
            records_cleared: self.buffer.clear(),
        };
        tracing::info!(
            results = summary.results_cleared,
            records = summary.records_cleared,
            "results and context buffer cleared"
        );
        summary
    }

}

/// Settle a record once its dispatch task has joined.  A panicked or
/// cancelled dispatch marks the record `error` and yields the message for
/// the caller.
fn finish_analysis(
    mut record: AnalysisRecord,
    joined: Result<DispatchReport, JoinError>,
    results: &ResultStore,
    metrics: &RelayMetrics,
) -> Result<AnalysisRecord, String> {
    let report = match joined {
        Ok(report) => report,
        Err(join_err) => {
            let message = if join_err.is_panic() {
                "analysis task panicked".to_string()
            } else {
                "analysis task was cancelled".to_string()
            };
            tracing::error!(analysis_id = %record.id, error = %join_err, "analysis task failed");
            record.fail_internal(&message);
            metrics.record_dispatch(AnalysisStatus::Error, 1, record.latency_ms.unwrap_or(0));
            store_final(results, &record);
            return Err(message);
        }
    };

    record.complete(report.outcome, report.attempts, report.elapsed_ms);
    metrics.record_dispatch(record.status, report.attempts, report.elapsed_ms);
    match record.status {
        AnalysisStatus::Error => tracing::warn!(
            analysis_id = %record.id,
            attempts = report.attempts,
            elapsed_ms = report.elapsed_ms,
            error = record.error.as_deref().unwrap_or(""),
            "analysis dispatch failed"
        ),
        _ => tracing::info!(
            analysis_id = %record.id,
            mode = record.mode.as_str(),
            records = record.records_received,
            context_records = record.context_records,
            attempts = report.attempts,
            elapsed_ms = report.elapsed_ms,
            "analysis completed"
        ),
    }
    store_final(results, &record);
    Ok(record)
}

fn store_final(results: &ResultStore, record: &AnalysisRecord) {
    if !results.update(&record.id, |stored| *stored = record.clone()) {
        tracing::debug!(analysis_id = %record.id, "results cleared while analysis was in flight");
    }
}
