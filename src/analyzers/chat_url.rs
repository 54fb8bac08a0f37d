use std::time::Duration;

use url::Url;

use super::{AnalysisResult, Analyzer, AnalyzerMode, DispatchError};
use crate::util::encode_query_component;

/// Definition for the chat application trigger.  The prompt travels as a
/// query parameter; the app picks it up on page load.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUrlDefinition {
    #[serde(default = "chat_url_default_base", alias = "url")]
    pub base_url: String,
    #[serde(default = "chat_url_default_param")]
    pub param: String,
    /// When false the URL is only constructed and recorded.
    #[serde(default = "chat_url_default_dispatch")]
    pub dispatch: bool,
}

fn chat_url_default_base() -> String {
    "http://127.0.0.1:8501/".to_string()
}
fn chat_url_default_param() -> String {
    "prompt".to_string()
}
fn chat_url_default_dispatch() -> bool {
    true
}

impl Default for ChatUrlDefinition {
    fn default() -> Self {
        Self {
            base_url: chat_url_default_base(),
            param: chat_url_default_param(),
            dispatch: chat_url_default_dispatch(),
        }
    }
}

/// Fire-and-forget analyzer.  Success means the URL was built (and, when
/// dispatch is on, the GET reached the app).  A non-2xx reply is recorded
/// but does not fail the analysis.
pub struct ChatUrlAnalyzer {
    def: ChatUrlDefinition,
    client: reqwest::Client,
    timeout: Duration,
}

impl ChatUrlAnalyzer {
    pub fn new(def: ChatUrlDefinition, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            def,
            client,
            timeout,
        })
    }

    /// `<base>?<param>=<percent-encoded prompt>`, keeping any query the base
    /// already carries.  The prompt is never truncated.
    pub fn build_url(&self, prompt: &str) -> Result<String, DispatchError> {
        let mut url = Url::parse(&self.def.base_url)
            .map_err(|e| DispatchError::InvalidUrl(format!("{}: {}", self.def.base_url, e)))?;
        let pair = format!(
            "{}={}",
            encode_query_component(&self.def.param),
            encode_query_component(prompt)
        );
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, pair),
            _ => pair,
        };
        url.set_query(Some(&query));
        Ok(url.into())
    }
}

#[async_trait::async_trait]
impl Analyzer for ChatUrlAnalyzer {
    fn mode(&self) -> AnalyzerMode {
        AnalyzerMode::ChatUrl
    }

    async fn analyze(&self, prompt: &str) -> Result<AnalysisResult, DispatchError> {
        let url = self.build_url(prompt)?;
        if !self.def.dispatch {
            return Ok(AnalysisResult::Forwarded {
                url,
                dispatch_status: None,
            });
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| DispatchError::from_transport(err, self.timeout))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "chat app answered non-success status; prompt URL kept");
        }
        Ok(AnalysisResult::Forwarded {
            url,
            dispatch_status: Some(status.as_u16()),
        })
    }
}
