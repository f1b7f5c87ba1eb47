//! Post-processing: turn raw model message content into a JSON object.
//!
//! ## Why is post-processing necessary?
//!
//! Even when told to "return strictly valid JSON", vision models routinely:
//!
//! - wrap the object in ` ```json ... ``` ` fences
//! - return the content as a list of `{type: "text"}` parts instead of a string
//! - prefix the answer with a `<think>…</think>` reasoning block
//! - leak a BOM or zero-width characters in front of the first brace
//!
//! The rules here are cheap and deterministic and run in this order:
//!
//! 1. Flatten list-of-parts content into one string
//! 2. Strip invisible Unicode
//! 3. Drop reasoning blocks
//! 4. Strip outer code fences
//! 5. Parse, and require a JSON object

use crate::error::ModelCallError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Parse a chat message `content` field into a JSON object.
///
/// # Errors
/// [`ModelCallError::Format`] for unsupported content shapes, invalid JSON,
/// or JSON that is not an object.
pub fn parse_message_content(content: &Value) -> Result<Value, ModelCallError> {
    let text = flatten_content(content)?;
    parse_json_object(&text)
}

/// Parse free text (after clean-up) into a JSON object.
pub fn parse_json_object(text: &str) -> Result<Value, ModelCallError> {
    let s = remove_invisible_chars(text);
    let s = strip_reasoning(&s);
    let s = strip_code_fences(&s);

    let parsed: Value = serde_json::from_str(&s)
        .map_err(|e| ModelCallError::Format(format!("Model output is not valid JSON: {e}")))?;
    if !parsed.is_object() {
        return Err(ModelCallError::Format("Model output is not an object".into()));
    }
    Ok(parsed)
}

// ── Rule 1: Flatten content parts ────────────────────────────────────────────

fn flatten_content(content: &Value) -> Result<String, ModelCallError> {
    match content {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Array(parts) => Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<String>()
            .trim()
            .to_string()),
        _ => Err(ModelCallError::Format("Unsupported content format".into())),
    }
}

// ── Rule 2: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        .collect::<String>()
        .trim()
        .to_string()
}

// ── Rule 3: Drop reasoning blocks ────────────────────────────────────────────

static RE_THINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^<think>.*?</think>").unwrap());

fn strip_reasoning(input: &str) -> String {
    RE_THINK.replace(input, "").trim().to_string()
}

// ── Rule 4: Strip outer code fences ──────────────────────────────────────────

fn strip_code_fences(input: &str) -> String {
    if !input.starts_with("```") {
        return input.to_string();
    }
    let inner = input.trim_matches('`').trim_start();
    let inner = match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &inner[4..],
        _ => inner,
    };
    inner.trim().to_string()
}
