//! Small text helpers shared by the relay, the analyzers and the dashboard.

use chrono::{DateTime, Utc};

/// `2024-05-01 12:30:00 UTC`
pub fn human_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Percent-encode a query component.  Everything except ASCII
/// alphanumerics and `-._` is escaped, spaces as `%20` and `*` as `%2A`.
pub fn encode_query_component(value: &str) -> String {
    // form_urlencoded writes spaces as '+' and escapes a literal '+' as %2B,
    // so every remaining '+' stands for a space.
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
}

/// JSON-escape a string without the surrounding quotes.
pub fn escape_json_string(value: &str) -> String {
    match serde_json::to_string(value) {
        Ok(mut json) => {
            if json.len() >= 2 {
                json.remove(0);
                json.pop();
            }
            json
        }
        Err(_) => String::new(),
    }
}

/// Largest byte index `<= max` that lies on a char boundary of `s`.
pub fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
