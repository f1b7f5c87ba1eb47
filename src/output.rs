//! Output types: the canonical extraction result and per-run statistics.
//!
//! [`ExtractionResult`] is provider-agnostic. Every field of every entry is a
//! non-empty string once it has passed through
//! [`crate::pipeline::normalize::normalize`], so consumers never have to
//! handle nulls or blanks.

use crate::error::AnalyzeError;
use serde::{Deserialize, Serialize};

/// Disclaimer used whenever a model omits one.
pub const DEFAULT_DISCLAIMER: &str =
    "DISCLAIMER: This is not medical advice. Consult a healthcare provider before use.";

/// Status string models use when a row cannot be classified.
pub const UNKNOWN_STATUS: &str = "Unknown";

/// One lab row extracted from the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Biomarker {
    pub name: String,
    pub value: String,
    /// Usually one of `Optimal`, `High`, `Low`, `Unknown`; kept as free text.
    pub status: String,
    pub explanation: String,
}

impl Biomarker {
    /// `true` when the status carries no classification.
    pub fn is_status_unknown(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(UNKNOWN_STATUS)
    }
}

/// One supplement / lifestyle recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub name: String,
    pub protocol: String,
    pub reason: String,
}

/// The canonical extraction result returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub biomarkers: Vec<Biomarker>,
    pub recommendations: Vec<Recommendation>,
    pub summary: String,
    pub disclaimer: String,
}

/// Counters describing one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Images in the request.
    pub total_images: usize,
    /// Page batches processed (1 when the request fits a single call).
    pub batches: usize,
    /// Remote model calls issued, including failed ones.
    pub model_calls: usize,
    /// Model calls that failed and advanced a fallback chain.
    pub failed_calls: usize,
    /// Batches re-extracted one image at a time.
    pub completeness_retries: usize,
    /// Batches whose result was replaced by a reconciliation pass.
    pub reconciled_batches: usize,
    /// Whether the synthesis pass replaced summary / recommendations.
    pub synthesized: bool,
    /// Wall-clock time of the whole run.
    pub duration_ms: u64,
}

/// Result of a successful analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub result: ExtractionResult,
    /// Human-readable trail of every model attempted and its outcome.
    pub diagnostic: String,
    pub stats: AnalysisStats,
}

impl AnalysisOutput {
    /// Split into the `(result, diagnostic)` pair exposed to transport layers.
    pub fn into_parts(self) -> (ExtractionResult, String) {
        (self.result, self.diagnostic)
    }
}

/// Collapse an analysis outcome into the `(result | null, diagnostic)` shape.
///
/// A fatal error becomes `(None, error message)`; the message of
/// [`AnalyzeError::ExtractionFailed`] is the full trail.
pub fn into_trail(outcome: Result<AnalysisOutput, AnalyzeError>) -> (Option<ExtractionResult>, String) {
    match outcome {
        Ok(output) => {
            let (result, diagnostic) = output.into_parts();
            (Some(result), diagnostic)
        }
        Err(e) => (None, e.to_string()),
    }
}
