//! In-memory store of analysis outcomes keyed by analysis id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::analyzers::{AnalysisResult, AnalyzerMode, DispatchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Processing,
    Success,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Success => "success",
            AnalysisStatus::Error => "error",
        }
    }
}

/// Outcome of one ingest.  The preview is a copy of the context text at
/// creation time, not a reference into the live buffer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub mode: AnalyzerMode,
    pub status: AnalysisStatus,
    pub records_received: usize,
    pub context_records: usize,
    pub context_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub attempts: u32,
}

impl AnalysisRecord {
    pub fn processing(
        id: String,
        mode: AnalyzerMode,
        records_received: usize,
        context_records: usize,
        context_preview: String,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            mode,
            status: AnalysisStatus::Processing,
            records_received,
            context_records,
            context_preview,
            error: None,
            result: None,
            completed_at: None,
            latency_ms: None,
            attempts: 0,
        }
    }

    /// Fold a finished dispatch into the record.
    pub fn complete(
        &mut self,
        outcome: Result<AnalysisResult, DispatchError>,
        attempts: u32,
        elapsed_ms: u64,
    ) {
        match outcome {
            Ok(result) => {
                self.status = AnalysisStatus::Success;
                self.result = Some(result);
                self.error = None;
            }
            Err(err) => {
                self.status = AnalysisStatus::Error;
                self.error = Some(err.to_string());
            }
        }
        self.attempts = attempts;
        self.latency_ms = Some(elapsed_ms);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail_internal(&mut self, message: &str) {
        let now = Utc::now();
        self.status = AnalysisStatus::Error;
        self.error = Some(message.to_string());
        self.attempts = self.attempts.max(1);
        self.latency_ms = Some((now - self.created_at).num_milliseconds().max(0) as u64);
        self.completed_at = Some(now);
    }
}

#[derive(Debug, Default)]
pub struct ResultStore {
    records: DashMap<String, AnalysisRecord>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: AnalysisRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<AnalysisRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Apply `f` to the record with `id`.  Returns false if it was cleared
    /// in the meantime.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut AnalysisRecord),
    {
        match self.records.get_mut(id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn all(&self) -> HashMap<String, AnalysisRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// All records, newest first.
    pub fn newest_first(&self) -> Vec<AnalysisRecord> {
        let mut out: Vec<AnalysisRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_by_status(&self, status: AnalysisStatus) -> usize {
        self.records.iter().filter(|e| e.value().status == status).count()
    }

    pub fn clear(&self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }
}
