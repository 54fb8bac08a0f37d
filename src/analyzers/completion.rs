use std::time::Duration;

use super::structured::{StructuredAnalysis, RESPONSE_INSTRUCTIONS};
use super::{AnalysisResult, Analyzer, AnalyzerMode, DispatchError};
use crate::util::escape_json_string;

/// One harm category threshold forwarded to the completion API.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// Definition for a hosted text-completion API.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDefinition {
    #[serde(default = "completion_default_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "completion_default_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "completion_default_model")]
    pub model: String,
    /// Optional JSON body template.  Placeholders: `${promptJson}`,
    /// `${prompt}`, `${model}`, `${safetySettingsJson}`.
    #[serde(default)]
    pub request_template: Option<String>,
    /// JSON pointer to the completion text in the reply.
    #[serde(default = "completion_default_response_pointer")]
    pub response_pointer: String,
    #[serde(default)]
    pub safety_settings: Vec<SafetySetting>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn completion_default_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        .to_string()
}
fn completion_default_api_key_header() -> String {
    "x-goog-api-key".to_string()
}
fn completion_default_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn completion_default_response_pointer() -> String {
    "/candidates/0/content/parts/0/text".to_string()
}

impl Default for CompletionDefinition {
    fn default() -> Self {
        Self {
            url: completion_default_url(),
            api_key: None,
            api_key_header: completion_default_api_key_header(),
            model: completion_default_model(),
            request_template: None,
            response_pointer: completion_default_response_pointer(),
            safety_settings: Vec::new(),
            temperature: None,
        }
    }
}

/// Structured analyzer: POSTs the prompt and parses the labelled reply.
pub struct CompletionAnalyzer {
    def: CompletionDefinition,
    client: reqwest::Client,
    timeout: Duration,
}

impl CompletionAnalyzer {
    pub fn new(def: CompletionDefinition, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            def,
            client,
            timeout,
        })
    }

    fn render_body(&self, prompt: &str) -> String {
        let safety_json =
            serde_json::to_string(&self.def.safety_settings).unwrap_or_else(|_| "[]".to_string());
        if let Some(template) = self.def.request_template.as_deref() {
            let prompt_json =
                serde_json::to_string(prompt).unwrap_or_else(|_| "\"\"".to_string());
            let mut rendered = template.replace("${promptJson}", &prompt_json);
            rendered = rendered.replace("${safetySettingsJson}", &safety_json);
            rendered = rendered.replace("${model}", &escape_json_string(&self.def.model));
            rendered = rendered.replace("${prompt}", &escape_json_string(prompt));
            return rendered;
        }
        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if !self.def.safety_settings.is_empty() {
            body["safetySettings"] = serde_json::json!(self.def.safety_settings);
        }
        if let Some(t) = self.def.temperature {
            body["generationConfig"] = serde_json::json!({ "temperature": t });
        }
        body.to_string()
    }

    /// Pull the completion text out of a reply body.  Non-JSON bodies are
    /// taken as the completion itself.
    fn extract_text(&self, body: &str) -> Result<String, DispatchError> {
        let json: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Ok(body.to_string()),
        };
        if let Some(s) = json.as_str() {
            return Ok(s.to_string());
        }
        let pointer = if self.def.response_pointer == "/" {
            ""
        } else {
            self.def.response_pointer.as_str()
        };
        match json.pointer(pointer) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(DispatchError::InvalidResponse(format!(
                "expected text at {}, found {}",
                self.def.response_pointer,
                json_kind(other)
            ))),
            None => Err(DispatchError::InvalidResponse(format!(
                "no completion text at {}",
                self.def.response_pointer
            ))),
        }
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[async_trait::async_trait]
impl Analyzer for CompletionAnalyzer {
    fn mode(&self) -> AnalyzerMode {
        AnalyzerMode::Completion
    }

    fn instructions(&self) -> Option<&str> {
        Some(RESPONSE_INSTRUCTIONS)
    }

    async fn analyze(&self, prompt: &str) -> Result<AnalysisResult, DispatchError> {
        let mut rb = self
            .client
            .post(&self.def.url)
            .header("content-type", "application/json");
        if let Some(key) = &self.def.api_key {
            rb = rb.header(self.def.api_key_header.as_str(), key);
        }
        let resp = rb
            .body(self.render_body(prompt))
            .send()
            .await
            .map_err(|err| DispatchError::from_transport(err, self.timeout))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| DispatchError::from_transport(err, self.timeout))?;
        if !status.is_success() {
            let mut body = text;
            body.truncate(crate::util::floor_char_boundary(&body, 512));
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let completion = self.extract_text(&text)?;
        tracing::debug!(status = status.as_u16(), chars = completion.len(), "completion received");
        Ok(AnalysisResult::Structured(StructuredAnalysis::parse(&completion)))
    }
}
