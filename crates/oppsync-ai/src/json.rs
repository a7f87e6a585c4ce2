//! Recovering the JSON value from chatty model output.

use serde_json::Value as JsonValue;

use crate::{AiError, Result};

/// Parse the first JSON value in a model reply.
///
/// Prefers the first non-empty fenced code block (with or without a `json` tag);
/// otherwise starts at the first `{` or `[`. Trailing prose after the value is ignored.
pub fn parse_json_response(text: &str) -> Result<JsonValue> {
    let candidate = fenced_block(text).unwrap_or(text).trim();
    let start = candidate
        .find(['{', '['])
        .ok_or_else(|| AiError::Parse("no JSON value in response".into()))?;

    let mut stream = serde_json::Deserializer::from_str(&candidate[start..]).into_iter::<JsonValue>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(AiError::Parse(e.to_string())),
        None => Err(AiError::Parse("empty response".into())),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let close = after_open.find("```")?;
        let inner = &after_open[..close];
        let inner = inner
            .strip_prefix("json")
            .or_else(|| inner.strip_prefix("JSON"))
            .unwrap_or(inner)
            .trim();
        if !inner.is_empty() {
            return Some(inner);
        }
        rest = &after_open[close + 3..];
    }
    None
}
