//! Ingestion normalizer.
//!
//! Turns a raw request body of unknown encoding and shape into an ordered
//! list of text records.  Decompression and UTF-8 decoding failures are hard
//! errors (the caller answers 400); malformed structured content degrades to
//! verbatim text so no shipped data is ever dropped.

use std::io::Read;

use flate2::read::MultiGzDecoder;
use serde_json::Value;

/// Default ceiling on the decompressed payload size (32 MiB).
pub const DEFAULT_MAX_DECODED_BYTES: usize = 32 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid gzip payload: {0}")]
    Gzip(#[source] std::io::Error),
    #[error("payload is not valid UTF-8 (first invalid byte at offset {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },
    #[error("decoded payload too large (limit {limit} bytes)")]
    DecodedTooLarge { limit: usize },
    #[error("unsupported content-encoding '{0}'")]
    UnsupportedEncoding(String),
}

/// Structural interpretation chosen for a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Json,
    Ndjson,
    Text,
}

impl PayloadFormat {
    /// Select the format from a declared content-type.  Parameters such as
    /// `charset` are ignored and matching is case-insensitive.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(raw) = content_type else {
            return PayloadFormat::Text;
        };
        let essence = raw
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => PayloadFormat::Json,
            "application/x-ndjson"
            | "application/ndjson"
            | "application/jsonl"
            | "application/x-jsonlines"
            | "application/jsonlines" => PayloadFormat::Ndjson,
            other if other.ends_with("+json") => PayloadFormat::Json,
            _ => PayloadFormat::Text,
        }
    }
}

/// Result of normalizing one ingest.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub records: Vec<String>,
    pub format: PayloadFormat,
    /// True when the body was gunzipped (declared or sniffed).
    pub decompressed: bool,
    /// Size of the UTF-8 text after decompression.
    pub decoded_bytes: usize,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Normalizer settings.  Only the decoded size ceiling is tunable.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_decoded_bytes: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
        }
    }
}

impl Normalizer {
    pub fn new(max_decoded_bytes: usize) -> Self {
        Self { max_decoded_bytes }
    }

    pub fn max_decoded_bytes(&self) -> usize {
        self.max_decoded_bytes
    }

    /// Decode and flatten `body` according to the declared headers.
    pub fn normalize(
        &self,
        body: &[u8],
        content_encoding: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<Normalized, NormalizeError> {
        let (bytes, decompressed) = self.decompress(body, content_encoding)?;
        let text = decode_utf8(bytes)?;
        let format = PayloadFormat::from_content_type(content_type);
        let records = match format {
            PayloadFormat::Json => json_records(&text),
            PayloadFormat::Ndjson => ndjson_records(&text),
            PayloadFormat::Text => text_records(&text),
        };
        Ok(Normalized {
            records,
            format,
            decompressed,
            decoded_bytes: text.len(),
        })
    }

    fn decompress(
        &self,
        body: &[u8],
        content_encoding: Option<&str>,
    ) -> Result<(Vec<u8>, bool), NormalizeError> {
        let declared = match content_encoding {
            Some(raw) => declared_gzip(raw)?,
            None => false,
        };
        // Some shippers compress without setting the header.
        let sniffed = content_encoding.is_none() && body.starts_with(&GZIP_MAGIC);
        if !(declared || sniffed) {
            if body.len() > self.max_decoded_bytes {
                return Err(NormalizeError::DecodedTooLarge {
                    limit: self.max_decoded_bytes,
                });
            }
            return Ok((body.to_vec(), false));
        }
        let limit = self.max_decoded_bytes;
        let mut out = Vec::with_capacity(body.len().saturating_mul(4).min(limit));
        let mut decoder = MultiGzDecoder::new(body).take(limit as u64 + 1);
        decoder
            .read_to_end(&mut out)
            .map_err(NormalizeError::Gzip)?;
        if out.len() > limit {
            return Err(NormalizeError::DecodedTooLarge { limit });
        }
        Ok((out, true))
    }
}

/// Interpret a content-encoding header value.  Returns true when gzip is
/// listed, false for identity, an error for anything else.
fn declared_gzip(raw: &str) -> Result<bool, NormalizeError> {
    let mut gzip = false;
    for token in raw.split(',').map(|t| t.trim().to_ascii_lowercase()) {
        match token.as_str() {
            "gzip" | "x-gzip" => gzip = true,
            "" | "identity" => {}
            _ => return Err(NormalizeError::UnsupportedEncoding(token)),
        }
    }
    Ok(gzip)
}

fn decode_utf8(bytes: Vec<u8>) -> Result<String, NormalizeError> {
    let mut text = String::from_utf8(bytes).map_err(|e| NormalizeError::InvalidUtf8 {
        valid_up_to: e.utf8_error().valid_up_to(),
    })?;
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    Ok(text)
}

/// Render one JSON value as a record.  Containers are pretty-printed,
/// strings keep their raw value, other scalars use their JSON text.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

fn push_non_blank(records: &mut Vec<String>, record: String) {
    if !record.trim().is_empty() {
        records.push(record);
    }
}

fn json_records(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => {
            let mut records = Vec::with_capacity(items.len());
            for item in &items {
                push_non_blank(&mut records, render_value(item));
            }
            records
        }
        Ok(value) => {
            let mut records = Vec::with_capacity(1);
            push_non_blank(&mut records, render_value(&value));
            records
        }
        Err(err) => {
            // Shippers frequently label NDJSON batches as application/json.
            tracing::debug!(error = %err, "JSON body did not parse as one document, falling back to NDJSON");
            ndjson_records(text)
        }
    }
}

fn ndjson_records(text: &str) -> Vec<String> {
    let mut records = Vec::new();
    for line in non_blank_lines(text) {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => push_non_blank(&mut records, render_value(&value)),
            Err(_) => records.push(line.to_string()),
        }
    }
    records
}

fn text_records(text: &str) -> Vec<String> {
    non_blank_lines(text).map(str::to_string).collect()
}

fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn records(body: &[u8], encoding: Option<&str>, ctype: Option<&str>) -> Vec<String> {
        Normalizer::default()
            .normalize(body, encoding, ctype)
            .unwrap()
            .records
    }

    #[test]
    fn plain_text_splits_non_blank_lines() {
        let out = records(b"line1\n\n  \r\nline2\r\nline3", None, None);
        assert_eq!(out, vec!["line1", "line2", "line3"]);
    }

    #[test]
    fn blank_body_is_empty_not_error() {
        let out = Normalizer::default()
            .normalize(b"  \n\t\n", None, Some("text/plain"))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(out.record_count(), 0);
    }

    #[test]
    fn json_array_mixes_scalars_and_objects() {
        let out = records(br#"["a", {"k":1}]"#, None, Some("application/json"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "a");
        assert_eq!(out[1], serde_json::to_string_pretty(&serde_json::json!({"k": 1})).unwrap());
        assert_eq!(out[1], "{\n  \"k\": 1\n}");
    }

    #[test]
    fn json_array_scalars_use_json_text() {
        let out = records(b"[1, true, null, \"\", [2]]", None, Some("application/json"));
        assert_eq!(out, vec!["1", "true", "null", "[\n  2\n]"]);
    }

    #[test]
    fn json_object_is_single_pretty_record() {
        let out = records(
            br#"{"level":"error","msg":"disk full"}"#,
            None,
            Some("Application/JSON; charset=utf-8"),
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("\n  \"level\": \"error\""));
    }

    #[test]
    fn malformed_json_document_degrades_to_ndjson() {
        let body = b"{\"a\":1}\n{\"b\":2}\n";
        let out = records(body, None, Some("application/json"));
        assert_eq!(out, vec!["{\n  \"a\": 1\n}", "{\n  \"b\": 2\n}"]);
    }

    #[test]
    fn ndjson_keeps_malformed_line_verbatim() {
        let body = b"{\"a\":1}\nnot json {\n\n{\"b\":2}\r\n";
        let out = records(body, None, Some("application/x-ndjson"));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], "{\n  \"a\": 1\n}");
        assert_eq!(out[1], "not json {");
        assert_eq!(out[2], "{\n  \"b\": 2\n}");
    }

    #[test]
    fn gzip_matches_uncompressed_records() {
        let body = b"alpha\nbeta\n\ngamma";
        let plain = records(body, None, None);
        let compressed = Normalizer::default()
            .normalize(&gzip(body), Some("gzip"), None)
            .unwrap();
        assert!(compressed.decompressed);
        assert_eq!(compressed.records, plain);
    }

    #[test]
    fn gzip_is_sniffed_without_header() {
        let out = records(&gzip(b"x\ny"), None, None);
        assert_eq!(out, vec!["x", "y"]);
    }

    #[test]
    fn invalid_gzip_is_decode_error() {
        let err = Normalizer::default()
            .normalize(b"definitely not gzip", Some("gzip"), None)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Gzip(_)));
    }

    #[test]
    fn invalid_utf8_reports_offset() {
        let err = Normalizer::default()
            .normalize(b"ok\xff\xfe", None, None)
            .unwrap_err();
        match err {
            NormalizeError::InvalidUtf8 { valid_up_to } => assert_eq!(valid_up_to, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn decoded_size_limit_applies_after_decompression() {
        let big = vec![b'a'; 4096];
        let err = Normalizer::new(1024)
            .normalize(&gzip(&big), Some("x-gzip"), None)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::DecodedTooLarge { limit: 1024 }));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let err = Normalizer::default()
            .normalize(b"abc", Some("br"), None)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedEncoding(ref e) if e == "br"));
    }

    #[test]
    fn identity_encoding_passes_through() {
        assert_eq!(records(b"a", Some("identity"), None), vec!["a"]);
    }

    #[test]
    fn bom_is_stripped() {
        assert_eq!(records("\u{feff}first\nsecond".as_bytes(), None, None), vec!["first", "second"]);
    }

    #[test]
    fn content_type_selection() {
        assert_eq!(PayloadFormat::from_content_type(None), PayloadFormat::Text);
        assert_eq!(
            PayloadFormat::from_content_type(Some("application/vnd.api+json")),
            PayloadFormat::Json
        );
        assert_eq!(
            PayloadFormat::from_content_type(Some("application/x-ndjson")),
            PayloadFormat::Ndjson
        );
        assert_eq!(
            PayloadFormat::from_content_type(Some("text/plain")),
            PayloadFormat::Text
        );
    }
}
