//! Prompt assembly for the analysis collaborator.

use std::borrow::Cow;

use chrono::{DateTime, Utc};

use crate::util::human_timestamp;

/// Everything embedded in one analysis prompt.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub analysis_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub record_count: usize,
    pub context: &'a str,
}

/// Render the prompt.  When `max_context_chars` is set and the context is
/// longer, only the most recent tail is kept and a marker line records how
/// much was omitted.
pub fn render(
    input: &PromptInput<'_>,
    instructions: Option<&str>,
    max_context_chars: Option<usize>,
) -> String {
    let context = match max_context_chars {
        Some(max) => cap_context(input.context, max),
        None => Cow::Borrowed(input.context),
    };
    let mut prompt = format!(
        "Log analysis request {id}\nTimestamp: {ts}\nRecords in context: {n}\n\n\
         --- BEGIN LOGS ---\n{context}\n--- END LOGS ---\n\n\
         Please perform predictive and prescriptive analysis of these logs: \
         identify likely causes, predict what will happen next if nothing changes, \
         and prescribe concrete remediation steps.",
        id = input.analysis_id,
        ts = human_timestamp(input.timestamp),
        n = input.record_count,
        context = context,
    );
    if let Some(extra) = instructions {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}

/// Keep the last `max_chars` characters of `context`.
pub fn cap_context(context: &str, max_chars: usize) -> Cow<'_, str> {
    let total = context.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(context);
    }
    let omitted = total - max_chars;
    let start = context
        .char_indices()
        .nth(omitted)
        .map(|(idx, _)| idx)
        .unwrap_or(context.len());
    Cow::Owned(format!(
        "[... {} earlier characters omitted ...]\n{}",
        omitted,
        &context[start..]
    ))
}
