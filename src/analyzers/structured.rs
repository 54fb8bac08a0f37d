//! Field extraction from free-text completion replies.
//!
//! The collaborator is asked to answer with labelled sections.  Lines are
//! scanned for the known labels; a section runs until the next label, so
//! values may span several lines.  Missing sections keep placeholders.

use serde::Serialize;

pub const DEFAULT_THREAT_LEVEL: &str = "UNKNOWN";
pub const DEFAULT_RISK_SCORE: &str = "N/A";
pub const DEFAULT_SUMMARY: &str = "No summary provided.";
pub const DEFAULT_KEY_FINDINGS: &str = "No key findings reported.";
pub const DEFAULT_IMMEDIATE_ACTIONS: &str = "No immediate actions specified.";
pub const DEFAULT_RECOMMENDATIONS: &str = "No recommendations provided.";

/// Reply format appended to prompts sent to the completion collaborator.
pub const RESPONSE_INSTRUCTIONS: &str = "\
Respond using exactly these labelled sections, each starting on its own line:
THREAT LEVEL: one of LOW, MEDIUM, HIGH, CRITICAL
RISK SCORE: a number from 0 to 100
SUMMARY: a short overview of what the logs show
KEY FINDINGS: the notable events, errors or anomalies
IMMEDIATE ACTIONS: what an operator should do right now
RECOMMENDATIONS: longer-term fixes and monitoring improvements";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ThreatLevel,
    RiskScore,
    Summary,
    KeyFindings,
    ImmediateActions,
    Recommendations,
}

const LABELS: [(&str, Field); 6] = [
    ("THREAT LEVEL", Field::ThreatLevel),
    ("RISK SCORE", Field::RiskScore),
    ("SUMMARY", Field::Summary),
    ("KEY FINDINGS", Field::KeyFindings),
    ("IMMEDIATE ACTIONS", Field::ImmediateActions),
    ("RECOMMENDATIONS", Field::Recommendations),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAnalysis {
    pub threat_level: String,
    pub risk_score: String,
    pub summary: String,
    pub key_findings: String,
    pub immediate_actions: String,
    pub recommendations: String,
    pub raw_response: String,
}

impl Default for StructuredAnalysis {
    fn default() -> Self {
        Self {
            threat_level: DEFAULT_THREAT_LEVEL.to_string(),
            risk_score: DEFAULT_RISK_SCORE.to_string(),
            summary: DEFAULT_SUMMARY.to_string(),
            key_findings: DEFAULT_KEY_FINDINGS.to_string(),
            immediate_actions: DEFAULT_IMMEDIATE_ACTIONS.to_string(),
            recommendations: DEFAULT_RECOMMENDATIONS.to_string(),
            raw_response: String::new(),
        }
    }
}

impl StructuredAnalysis {
    pub fn parse(reply: &str) -> Self {
        let mut out = StructuredAnalysis {
            raw_response: reply.to_string(),
            ..StructuredAnalysis::default()
        };
        let mut current: Option<(Field, Vec<String>)> = None;
        for line in reply.lines() {
            if let Some((field, rest)) = match_label(line) {
                if let Some((prev, body)) = current.take() {
                    out.set(prev, &body);
                }
                current = Some((field, vec![rest.to_string()]));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line.trim_end().to_string());
            }
        }
        if let Some((field, body)) = current {
            out.set(field, &body);
        }
        out
    }

    fn set(&mut self, field: Field, body: &[String]) {
        let value = body.join("\n").trim().to_string();
        if value.is_empty() {
            return;
        }
        let slot = match field {
            Field::ThreatLevel => &mut self.threat_level,
            Field::RiskScore => &mut self.risk_score,
            Field::Summary => &mut self.summary,
            Field::KeyFindings => &mut self.key_findings,
            Field::ImmediateActions => &mut self.immediate_actions,
            Field::Recommendations => &mut self.recommendations,
        };
        *slot = value;
    }
}

/// Recognise `LABEL: value` with optional markdown decoration such as
/// `**THREAT LEVEL:** HIGH` or `## Summary:`.
fn match_label(line: &str) -> Option<(Field, &str)> {
    let stripped = line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '-'));
    let upper = stripped.to_ascii_uppercase();
    for (label, field) in LABELS {
        if !upper.starts_with(label) {
            continue;
        }
        let after = stripped[label.len()..].trim_start_matches('*');
        if let Some(rest) = after.strip_prefix(':') {
            let rest = rest.trim_start_matches('*').trim();
            return Some((field, rest));
        }
    }
    None
}
