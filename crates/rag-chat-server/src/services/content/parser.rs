//! Extraction of structured payloads from free-form model output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::utils::error::ParseError;

static FENCED_BLOCK: Lazy<Option<Regex>> = Lazy::new(|| {
    match Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_-]*)[^\n]*\n(.*?)```") {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Fenced block regex compilation failed: {}", e);
            None
        }
    }
});

/// Body of the first fenced block tagged `kind`; without one, the whole text.
pub fn extract_block<'a>(text: &'a str, kind: &str) -> Result<&'a str, ParseError> {
    let fenced = FENCED_BLOCK.as_ref().and_then(|re| {
        re.captures_iter(text)
            .find(|caps| caps.get(1).is_some_and(|lang| lang.as_str().eq_ignore_ascii_case(kind)))
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str())
    });
    let body = fenced.unwrap_or(text).trim();

    if body.is_empty() {
        return Err(ParseError::new(format!("model returned no {} content", kind), text));
    }
    Ok(body)
}

/// Extract first JSON object or array substring from a possibly noisy LLM output.
/// Handles nested brackets and brackets inside JSON strings (with escapes).
pub fn extract_first_json(s: &str) -> Option<&str> {
    let mut start: Option<usize> = None;
    let mut stack: Vec<char> = Vec::new();

    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if start.is_none() {
            if ch == '{' || ch == '[' {
                start = Some(i);
                stack.push(ch);
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                let open = stack.pop()?;
                if (open == '{') != (ch == '}') {
                    return None;
                }
                if stack.is_empty() {
                    let st = start?;
                    return Some(&s[st..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parses a JSON payload, preferring a ```json block, then the first
/// balanced object or array in the text.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let body = extract_block(text, "json")?;

    match serde_json::from_str::<T>(body) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let candidate = extract_first_json(body)
                .ok_or_else(|| ParseError::new(format!("invalid JSON: {}", first_err), text))?;
            serde_json::from_str::<T>(candidate)
                .map_err(|e| ParseError::new(format!("invalid JSON: {}", e), text))
        }
    }
}

/// One entry per non-empty line, with bullets and numbering stripped.
pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '•' | '-' | '*' | '.' | ')' | ' ' | '\t')
                })
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}
