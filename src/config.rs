use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::analyzers::{AnalyzerConfig, AnalyzerMode, RetryPolicy, DEFAULT_TIMEOUT_MS};
use crate::buffer::DEFAULT_CAPACITY;
use crate::normalize::DEFAULT_MAX_DECODED_BYTES;

pub const DEFAULT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub analyzer: AnalyzerConfig,
    pub buffer_capacity: usize,
    pub preview_chars: usize,
    pub max_request_bytes: Option<usize>,
    pub max_decoded_bytes: usize,
    pub max_context_chars: Option<usize>,
    pub dispatch_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            buffer_capacity: DEFAULT_CAPACITY,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            max_request_bytes: None,
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
            max_context_chars: None,
            dispatch_timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut analyzer = if let Ok(path) = env::var("RELAY_ANALYZER_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Failed to read RELAY_ANALYZER_CONFIG '{}': file unreadable",
                    path
                )
            })?;
            serde_json::from_str::<AnalyzerConfig>(&content).with_context(|| {
                format!(
                    "Failed to parse RELAY_ANALYZER_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?
        } else {
            AnalyzerConfig::default()
        };

        if let Some(mode) = non_empty_var("RELAY_ANALYZER_MODE")? {
            analyzer.mode = mode
                .parse::<AnalyzerMode>()
                .map_err(|e| anyhow!("RELAY_ANALYZER_MODE: {}", e))?;
        }
        if let Some(url) = non_empty_var("RELAY_CHAT_URL")? {
            analyzer.chat_url.base_url = url;
        }
        if let Some(dispatch) = parse_bool_env("RELAY_CHAT_DISPATCH")? {
            analyzer.chat_url.dispatch = dispatch;
        }
        if let Some(url) = non_empty_var("RELAY_COMPLETION_URL")? {
            analyzer.completion.url = url;
        }
        if let Some(key) = non_empty_var("RELAY_COMPLETION_API_KEY")? {
            analyzer.completion.api_key = Some(key);
        }

        let buffer_capacity =
            parse_optional_u64("RELAY_BUFFER_CAPACITY")?.unwrap_or(DEFAULT_CAPACITY as u64) as usize;
        if buffer_capacity == 0 {
            bail!("RELAY_BUFFER_CAPACITY must be at least 1");
        }
        let preview_chars = parse_optional_u64("RELAY_PREVIEW_CHARS")?
            .unwrap_or(DEFAULT_PREVIEW_CHARS as u64) as usize;
        let max_request_bytes = parse_optional_u64("RELAY_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let max_decoded_bytes = parse_optional_u64("RELAY_MAX_DECODED_BYTES")?
            .unwrap_or(DEFAULT_MAX_DECODED_BYTES as u64) as usize;
        let max_context_chars = parse_optional_u64("RELAY_MAX_CONTEXT_CHARS")?.map(|v| v as usize);
        let dispatch_timeout_ms =
            parse_optional_u64("RELAY_DISPATCH_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS);
        if dispatch_timeout_ms == 0 {
            bail!("RELAY_DISPATCH_TIMEOUT_MS must be at least 1");
        }
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_optional_u64("RELAY_DISPATCH_RETRIES")?
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_retries),
            backoff: parse_optional_u64("RELAY_DISPATCH_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
        };

        Ok(Self {
            analyzer,
            buffer_capacity,
            preview_chars,
            max_request_bytes,
            max_decoded_bytes,
            max_context_chars,
            dispatch_timeout_ms,
            retry,
        })
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

fn non_empty_var(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("{}: {}", var, err)),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match non_empty_var(var)? {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        None => Ok(None),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match non_empty_var(var)? {
        Some(value) => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
