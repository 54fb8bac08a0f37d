//! Analysis collaborators.
//!
//! An `Analyzer` turns a prompt into an `AnalysisResult`.  Two shapes exist:
//! the fire-and-forget chat URL trigger and the structured completion API.
//! The `Dispatcher` wraps whichever one is configured with the per-attempt
//! timeout and the retry policy.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub mod chat_url;
pub mod completion;
pub mod prompt;
pub mod structured;

use self::chat_url::{ChatUrlAnalyzer, ChatUrlDefinition};
use self::completion::{CompletionAnalyzer, CompletionDefinition};
pub use self::structured::StructuredAnalysis;

/// Default per-attempt dispatch timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerMode {
    #[default]
    #[serde(alias = "chatUrl", alias = "url")]
    ChatUrl,
    #[serde(alias = "llm")]
    Completion,
}

impl AnalyzerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerMode::ChatUrl => "chat_url",
            AnalyzerMode::Completion => "completion",
        }
    }
}

impl FromStr for AnalyzerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat_url" | "chaturl" | "url" => Ok(AnalyzerMode::ChatUrl),
            "completion" | "llm" => Ok(AnalyzerMode::Completion),
            other => Err(format!("unknown analyzer mode '{}'", other)),
        }
    }
}

/// What the collaborator produced for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisResult {
    /// Prompt was handed off through a URL; no structured reply expected.
    #[serde(rename_all = "camelCase")]
    Forwarded {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dispatch_status: Option<u16>,
    },
    Structured(StructuredAnalysis),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("analysis collaborator timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("analysis collaborator unreachable: {0}")]
    Unreachable(String),
    #[error("analysis collaborator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response from analysis collaborator: {0}")]
    InvalidResponse(String),
    #[error("invalid collaborator URL: {0}")]
    InvalidUrl(String),
}

impl DispatchError {
    /// Timeouts, transport failures, throttling and server errors may
    /// succeed on a later attempt; everything else will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Timeout { .. } | DispatchError::Unreachable(_) => true,
            DispatchError::Status { status, .. } => *status == 429 || *status >= 500,
            DispatchError::InvalidResponse(_) | DispatchError::InvalidUrl(_) => false,
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }
        } else {
            DispatchError::Unreachable(err.to_string())
        }
    }
}

/// Trait implemented by every collaborator.  `instructions` is appended to
/// the prompt so the collaborator knows what reply format is expected.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    fn mode(&self) -> AnalyzerMode;

    fn instructions(&self) -> Option<&str> {
        None
    }

    async fn analyze(&self, prompt: &str) -> Result<AnalysisResult, DispatchError>;
}

/// Analyzer definitions, loaded from the optional JSON file named by
/// `RELAY_ANALYZER_CONFIG` and then overridden by environment variables.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub mode: AnalyzerMode,
    #[serde(default, alias = "chat_url")]
    pub chat_url: ChatUrlDefinition,
    #[serde(default)]
    pub completion: CompletionDefinition,
}

impl AnalyzerConfig {
    pub fn build(&self, timeout: Duration) -> Result<Arc<dyn Analyzer>, reqwest::Error> {
        let analyzer: Arc<dyn Analyzer> = match self.mode {
            AnalyzerMode::ChatUrl => Arc::new(ChatUrlAnalyzer::new(self.chat_url.clone(), timeout)?),
            AnalyzerMode::Completion => {
                if self.completion.api_key.is_none() {
                    tracing::warn!(url = %self.completion.url, "completion analyzer has no API key configured");
                }
                Arc::new(CompletionAnalyzer::new(self.completion.clone(), timeout)?)
            }
        };
        Ok(analyzer)
    }
}

/// Explicit retry policy for outbound dispatch.  The default is a single
/// attempt with no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Outcome of a dispatch including bookkeeping for the analysis record.
#[derive(Debug)]
pub struct DispatchReport {
    pub outcome: Result<AnalysisResult, DispatchError>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct Dispatcher {
    analyzer: Arc<dyn Analyzer>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(analyzer: Arc<dyn Analyzer>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            analyzer,
            timeout,
            retry,
        }
    }

    pub fn mode(&self) -> AnalyzerMode {
        self.analyzer.mode()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.analyzer.instructions()
    }

    /// Run the analyzer until it succeeds, fails with a non-retryable error
    /// or the retry budget is spent.  Each attempt is bounded by the timeout.
    pub async fn dispatch(&self, prompt: &str) -> DispatchReport {
        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.timeout, self.analyzer.analyze(prompt)).await
            {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }),
            };
            match result {
                Err(err) if err.is_retryable() && attempts <= self.retry.max_retries => {
                    tracing::warn!(
                        mode = self.analyzer.mode().as_str(),
                        attempt = attempts,
                        max_retries = self.retry.max_retries,
                        error = %err,
                        "dispatch attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                outcome => {
                    return DispatchReport {
                        outcome,
                        attempts,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    };
                }
            }
        }
    }
}
