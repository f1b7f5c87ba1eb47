//! Cross-batch merge: combine per-batch results in page order.
//!
//! Batches are iterated in the order they were extracted, so the merged
//! biomarker list is the first-seen order across batch 1, then batch 2, and
//! so on. Rows are first merged on `(name, value, status)`, then the final
//! [`dedupe`] pass folds rows that differ only in status into one, so the
//! merged count can be lower than the number of distinct triples.

use crate::output::{ExtractionResult, DEFAULT_DISCLAIMER};
use crate::pipeline::normalize::{dedupe, fold};
use std::collections::HashSet;

/// Merge ordered batch results into one.
///
/// Returns `None` when `chunks` is empty.
///
/// * summary — `"Analyzed report pages in order across N batch(es)."`
///   followed by the last non-empty batch summary (scanning backwards).
/// * disclaimer — first non-empty batch disclaimer, else the default.
pub fn merge_batches(chunks: &[ExtractionResult]) -> Option<ExtractionResult> {
    if chunks.is_empty() {
        return None;
    }

    let mut seen = HashSet::new();
    let biomarkers = chunks
        .iter()
        .flat_map(|c| c.biomarkers.iter())
        .filter(|b| seen.insert((fold(&b.name), fold(&b.value), fold(&b.status))))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let recommendations = chunks
        .iter()
        .flat_map(|c| c.recommendations.iter())
        .filter(|r| seen.insert((fold(&r.name), fold(&r.protocol))))
        .cloned()
        .collect();

    let preamble = format!(
        "Analyzed report pages in order across {} batch(es).",
        chunks.len()
    );
    let summary = match chunks
        .iter()
        .rev()
        .map(|c| c.summary.trim())
        .find(|s| !s.is_empty())
    {
        Some(last) => format!("{preamble} {last}"),
        None => preamble,
    };

    let disclaimer = chunks
        .iter()
        .map(|c| c.disclaimer.trim())
        .find(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DISCLAIMER)
        .to_string();

    Some(dedupe(ExtractionResult {
        biomarkers,
        recommendations,
        summary,
        disclaimer,
    }))
}
