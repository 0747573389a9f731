//! Best-effort recovery of structured data from a backend's textual reply.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn json_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[ \t]*(?i:json)[ \t]*\r?\n(.*?)(?:```|\z)").ok())
        .as_ref()
}

fn any_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[^\n`]*\r?\n(.*?)(?:```|\z)").ok())
        .as_ref()
}

/// Normalize a raw backend output.
///
/// Structured values pass through. Strings are tried as: `json`-labeled fenced
/// blocks, any fenced block, the bare string, then an object embedded in prose,
/// each also with unbalanced braces closed. Only a parse yielding a non-string
/// value counts; otherwise the original is returned. Pure and idempotent.
pub fn repair(raw: &Value) -> Value {
    match raw {
        Value::String(text) => repair_text(text).unwrap_or_else(|| raw.clone()),
        other => other.clone(),
    }
}

fn repair_text(text: &str) -> Option<Value> {
    let mut candidates: Vec<&str> = Vec::new();
    for re in [json_fence(), any_fence()].into_iter().flatten() {
        candidates.extend(re.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str()));
    }
    candidates.push(text);
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(&text[start..=end]);
        }
    }
    if let Some(start) = text.find('{') {
        candidates.push(&text[start..]);
    }

    candidates.into_iter().find_map(|c| parse_structured(c.trim()))
}

fn parse_structured(candidate: &str) -> Option<Value> {
    if candidate.is_empty() {
        return None;
    }
    if let Some(v) = parse_non_string(candidate) {
        return Some(v);
    }
    if candidate.starts_with('{') || candidate.starts_with('[') {
        return parse_non_string(&balance_braces(candidate));
    }
    None
}

fn parse_non_string(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::String(_)) | Err(_) => None,
        Ok(v) => Some(v),
    }
}

/// Close any brackets, braces, or string left open, innermost first.
/// A trailing comma before the added closers is dropped.
pub(crate) fn balance_braces(text: &str) -> String {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                open.pop();
            }
            _ => {}
        }
    }

    let mut result = text.to_string();
    if in_string {
        result.push('"');
    }
    if !open.is_empty() {
        let trimmed_len = result.trim_end().trim_end_matches(',').len();
        result.truncate(trimmed_len);
    }
    while let Some(closer) = open.pop() {
        result.push(closer);
    }
    result
}
