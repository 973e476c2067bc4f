//! Tolerant extraction of JSON from model output.
//!
//! Models wrap JSON in prose, fence it in code blocks, leave trailing commas
//! or stop mid-object. [`parse_json`] tries, in order: the whole text, each
//! fenced code block, then every brace/bracket-balanced span found by a
//! string-aware scan. Candidates that fail to parse are retried once after
//! cleanup. As a last resort every object or array candidate is retried with
//! stray quotes inside its string values escaped.

#[cfg(test)]
mod tests;

use std::sync::LazyLock;

use fancy_regex::Regex;
use serde_json::Value;
use tracing::debug;

static CODE_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z]*[ \t]*\r?\n?([\s\S]*?)```").expect("valid regex")
});

static TRAILING_COMMA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

static QUOTED_STRING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("valid regex"));

/// Outcome of [`parse_json`]
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedJson {
    Ok(Value),
    /// Something JSON-shaped was present but nothing parsed
    MalformedJson,
    /// No JSON-shaped text at all
    NotFound,
}

impl ParsedJson {
    #[inline]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::MalformedJson | Self::NotFound => None,
        }
    }

    #[inline]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::MalformedJson | Self::NotFound => None,
        }
    }
}

/// Drop trailing commas and turn raw line breaks and tabs into spaces
fn clean(candidate: &str) -> String {
    let flattened = candidate.replace(['\n', '\r', '\t'], " ");
    TRAILING_COMMA_REGEX
        .replace_all(&flattened, "$1")
        .into_owned()
}

fn parse_candidate(candidate: &str) -> Option<Value> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }

    serde_json::from_str(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&clean(candidate)).ok())
}

/// Byte index of the delimiter closing the one at `start`, skipping over
/// string contents and escapes
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// Balanced spans in order of appearance, plus whether an opening
/// delimiter was left unclosed. An unclosed opener is skipped so spans
/// nested after it are still found.
fn balanced_candidates(text: &str) -> (Vec<&str>, bool) {
    let mut candidates = Vec::new();
    let mut unclosed = false;
    let mut position = 0;

    while let Some(found) = text[position..].find(['{', '[']) {
        let start = position + found;
        match balanced_end(text, start) {
            Some(end) => {
                candidates.push(&text[start..=end]);
                position = end + 1;
            }
            None => {
                unclosed = true;
                position = start + 1;
            }
        }
    }

    (candidates, unclosed)
}

/// Escape double quotes inside string values. A quote only ends a string
/// when the next non-space character is one that may follow a JSON string.
fn escape_inner_quotes(candidate: &str) -> String {
    let mut repaired = String::with_capacity(candidate.len() + 8);
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in candidate.char_indices() {
        if !in_string {
            in_string = ch == '"';
            repaired.push(ch);
            continue;
        }

        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                let next = candidate[index + 1..].trim_start().chars().next();
                if matches!(next, None | Some(':' | ',' | '}' | ']')) {
                    in_string = false;
                } else {
                    repaired.push('\\');
                }
            }
            _ => {}
        }
        repaired.push(ch);
    }

    repaired
}

/// Find and parse the JSON value in `text`
#[inline]
pub fn parse_json(text: &str) -> ParsedJson {
    if let Some(value) = parse_candidate(text) {
        return ParsedJson::Ok(value);
    }

    let blocks: Vec<&str> = CODE_BLOCK_REGEX
        .captures_iter(text)
        .flatten()
        .filter_map(|captures| captures.get(1).map(|block| block.as_str()))
        .collect();
    for block in &blocks {
        if let Some(value) = parse_candidate(block) {
            debug!("Parsed JSON from fenced code block");
            return ParsedJson::Ok(value);
        }
    }

    let (spans, unclosed) = balanced_candidates(text);
    for span in &spans {
        if let Some(value) = parse_candidate(span) {
            debug!("Parsed JSON from balanced span");
            return ParsedJson::Ok(value);
        }
    }

    let structured = std::iter::once(text)
        .chain(blocks.iter().copied())
        .chain(spans.iter().copied())
        .map(str::trim)
        .filter(|candidate| candidate.starts_with(['{', '[']));
    for candidate in structured {
        if let Ok(value) = serde_json::from_str(&escape_inner_quotes(&clean(candidate))) {
            debug!("Parsed JSON after escaping inner quotes");
            return ParsedJson::Ok(value);
        }
    }

    if unclosed || !blocks.is_empty() || !spans.is_empty() {
        ParsedJson::MalformedJson
    } else {
        ParsedJson::NotFound
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_in(value: &Value, field: &str) -> Option<String> {
    match value {
        Value::Object(map) => map.get(field).map(value_to_string),
        Value::Array(items) => items.iter().find_map(|item| field_in(item, field)),
        _ => None,
    }
}

/// Unescape a JSON string body, keeping it raw when it is not valid
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

/// Value of `field` in the JSON found in `text`, falling back to a
/// `"field": value` pattern match when the JSON does not parse
#[inline]
pub fn extract_field(text: &str, field: &str) -> Option<String> {
    if let ParsedJson::Ok(value) = parse_json(text) {
        if let Some(found) = field_in(&value, field) {
            return Some(found);
        }
    }

    let name = fancy_regex::escape(field);
    let quoted = Regex::new(&format!(r#""{name}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).ok()?;
    if let Ok(Some(captures)) = quoted.captures(text) {
        return captures.get(1).map(|m| unescape(m.as_str()));
    }

    let bare = Regex::new(&format!(r#""{name}"\s*:\s*([^\s,}}\]"][^,}}\]\n]*)"#)).ok()?;
    bare.captures(text)
        .ok()
        .flatten()
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn strings_in(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().map(value_to_string).collect()),
        Value::Object(map) => map.values().find_map(|v| match v {
            Value::Array(_) => strings_in(v),
            _ => None,
        }),
        _ => None,
    }
}

/// List of strings in `text`: a JSON array (or the first array inside a
/// JSON object), else every double-quoted string
#[inline]
pub fn extract_string_list(text: &str) -> Vec<String> {
    if let ParsedJson::Ok(value) = parse_json(text) {
        if let Some(strings) = strings_in(&value) {
            return strings;
        }
    }

    QUOTED_STRING_REGEX
        .captures_iter(text)
        .flatten()
        .filter_map(|captures| captures.get(1).map(|m| unescape(m.as_str())))
        .filter(|s| !s.trim().is_empty())
        .collect()
}
