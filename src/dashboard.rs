//! Read-only HTML view of the stored analyses.

use std::fmt::Write as _;

use crate::analyzers::AnalysisResult;
use crate::metrics::Gauges;
use crate::results::{AnalysisRecord, AnalysisStatus};
use crate::util::human_timestamp;

const STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;width:100%}\
td,th{border:1px solid #ccc;padding:6px;vertical-align:top;text-align:left}\
pre{white-space:pre-wrap;margin:0;font-size:12px}\
.success{color:#1a7f37}.error{color:#cf222e}.processing{color:#9a6700}";

/// Escape text for use inside HTML element content and quoted attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render every record, newest first.
pub fn render(records: &[AnalysisRecord], gauges: &Gauges) -> String {
    let mut page = String::new();
    writeln!(
        &mut page,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Log relay results</title><style>{}</style></head><body>",
        STYLE
    )
    .ok();
    writeln!(&mut page, "<h1>Log relay results</h1>").ok();
    let failed = records
        .iter()
        .filter(|r| r.status == AnalysisStatus::Error)
        .count();
    writeln!(
        &mut page,
        "<p>{} analyses ({} failed). Context buffer: {}/{} records.</p>",
        records.len(),
        failed,
        gauges.buffer_records,
        gauges.buffer_capacity
    )
    .ok();

    if records.is_empty() {
        writeln!(&mut page, "<p><em>No analyses yet.</em></p></body></html>").ok();
        return page;
    }

    writeln!(
        &mut page,
        "<table><tr><th>Created</th><th>Id</th><th>Status</th><th>Records</th><th>Context</th><th>Result</th></tr>"
    )
    .ok();
    for record in records {
        let status = record.status.as_str();
        writeln!(
            &mut page,
            "<tr><td>{}</td><td><a href=\"/results/{}\">{}</a></td><td class=\"{}\">{}</td><td>{} new / {} in window</td><td><pre>{}</pre></td><td>{}</td></tr>",
            human_timestamp(record.created_at),
            escape_html(&record.id),
            escape_html(&record.id),
            status,
            status,
            record.records_received,
            record.context_records,
            escape_html(&record.context_preview),
            render_outcome(record)
        )
        .ok();
    }
    writeln!(&mut page, "</table></body></html>").ok();
    page
}

fn render_outcome(record: &AnalysisRecord) -> String {
    if let Some(error) = &record.error {
        return format!("<span class=\"error\">{}</span>", escape_html(error));
    }
    match &record.result {
        None => "<em>pending</em>".to_string(),
        Some(AnalysisResult::Forwarded {
            url,
            dispatch_status,
        }) => {
            let status = match dispatch_status {
                Some(code) => format!(" (HTTP {})", code),
                None => " (not sent)".to_string(),
            };
            format!(
                "Forwarded to <a href=\"{0}\">chat app</a>{1}",
                escape_html(url),
                status
            )
        }
        Some(AnalysisResult::Structured(analysis)) => format!(
            "<b>Threat level:</b> {}<br><b>Risk score:</b> {}<br><b>Summary:</b> {}<br>\
             <b>Key findings:</b><pre>{}</pre><b>Immediate actions:</b><pre>{}</pre>\
             <b>Recommendations:</b><pre>{}</pre>",
            escape_html(&analysis.threat_level),
            escape_html(&analysis.risk_score),
            escape_html(&analysis.summary),
            escape_html(&analysis.key_findings),
            escape_html(&analysis.immediate_actions),
            escape_html(&analysis.recommendations)
        ),
    }
}
