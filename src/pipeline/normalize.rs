//! Schema normalisation: raw model JSON → [`ExtractionResult`].
//!
//! Models return roughly the right shape but routinely omit fields, emit
//! nulls, pad strings with whitespace, or repeat a row that straddles two
//! stitched images. [`normalize`] rejects output whose top-level shape is
//! wrong (so the fallback chain moves on) and repairs everything else:
//!
//! 1. Every field is coerced to a trimmed string; blanks get fixed fallbacks.
//! 2. Non-object list items are dropped.
//! 3. [`dedupe`] collapses repeated rows within the result.

use crate::error::ModelCallError;
use crate::output::{Biomarker, ExtractionResult, Recommendation, DEFAULT_DISCLAIMER, UNKNOWN_STATUS};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

const MISSING_NAME: &str = "Unknown";
const MISSING_VALUE: &str = "N/A";
const MISSING_EXPLANATION: &str = "No explanation provided.";
const MISSING_RECOMMENDATION: &str = "Recommendation";
const MISSING_PROTOCOL: &str = "No protocol provided.";
const MISSING_REASON: &str = "No reason provided.";
const MISSING_SUMMARY: &str = "No summary provided.";

/// Validate and coerce a raw model object into the canonical result.
///
/// # Errors
/// [`ModelCallError::Schema`] when `biomarkers` or `recommendations` is not
/// an array, or `summary` is not a string.
pub fn normalize(raw: &Value) -> Result<ExtractionResult, ModelCallError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ModelCallError::Schema("LLM output is not an object".into()))?;

    let (Some(Value::Array(biomarkers)), Some(Value::Array(recommendations)), Some(Value::String(summary))) = (
        obj.get("biomarkers"),
        obj.get("recommendations"),
        obj.get("summary"),
    ) else {
        return Err(ModelCallError::Schema(
            "LLM output missing required fields".into(),
        ));
    };

    let biomarkers = biomarkers
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Biomarker {
            name: field_or(item, &["name"], MISSING_NAME),
            value: field_or(item, &["value"], MISSING_VALUE),
            status: field_or(item, &["status"], UNKNOWN_STATUS),
            explanation: field_or(item, &["explanation"], MISSING_EXPLANATION),
        })
        .collect();

    let recommendations = recommendations
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Recommendation {
            name: field_or(item, &["name"], MISSING_RECOMMENDATION),
            protocol: field_or(item, &["protocol", "protocolText"], MISSING_PROTOCOL),
            reason: field_or(item, &["reason"], MISSING_REASON),
        })
        .collect();

    let summary = non_blank_or(summary.trim().to_string(), MISSING_SUMMARY);
    let disclaimer = non_blank_or(
        obj.get("disclaimer").map(coerce).unwrap_or_default(),
        DEFAULT_DISCLAIMER,
    );

    Ok(dedupe(ExtractionResult {
        biomarkers,
        recommendations,
        summary,
        disclaimer,
    }))
}

/// Collapse repeated rows inside one result.
///
/// * Biomarkers sharing a case-insensitive `(name, value)` become one entry
///   at the position of the first occurrence. The longer explanation wins,
///   and an `Unknown` status is replaced by a later specific one.
/// * Recommendations sharing a case-insensitive `(name, protocol)` keep the
///   first occurrence.
pub fn dedupe(result: ExtractionResult) -> ExtractionResult {
    let mut biomarkers: Vec<Biomarker> = Vec::with_capacity(result.biomarkers.len());
    let mut positions: HashMap<(String, String), usize> = HashMap::new();

    for item in result.biomarkers {
        let key = (fold(&item.name), fold(&item.value));
        match positions.get(&key) {
            Some(&idx) => {
                let existing = &mut biomarkers[idx];
                if item.explanation.chars().count() > existing.explanation.chars().count() {
                    existing.explanation = item.explanation;
                }
                if existing.is_status_unknown() && !item.status.trim().is_empty() {
                    existing.status = item.status;
                }
            }
            None => {
                positions.insert(key, biomarkers.len());
                biomarkers.push(item);
            }
        }
    }

    let mut seen = HashSet::new();
    let recommendations = result
        .recommendations
        .into_iter()
        .filter(|r| seen.insert((fold(&r.name), fold(&r.protocol))))
        .collect();

    ExtractionResult {
        biomarkers,
        recommendations,
        summary: result.summary,
        disclaimer: result.disclaimer,
    }
}

/// Case-insensitive comparison key.
pub(crate) fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

/// First present, non-null key wins; the result is trimmed and defaulted.
fn field_or(item: &Map<String, Value>, keys: &[&str], fallback: &str) -> String {
    let raw = keys
        .iter()
        .filter_map(|k| item.get(*k))
        .find(|v| !v.is_null())
        .map(coerce)
        .unwrap_or_default();
    non_blank_or(raw, fallback)
}

/// Stringify any JSON value the way a model most likely meant it.
fn coerce(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn non_blank_or(s: String, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s
    }
}
