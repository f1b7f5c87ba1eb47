//! Synthesis pass: regenerate summary and recommendations from the full,
//! merged biomarker list.
//!
//! The request is always text-only, whatever the mode. Only
//! `recommendations`, `summary` and `disclaimer` are taken from the model;
//! biomarkers stay exactly as extracted.

use crate::config::AnalysisConfig;
use crate::diagnostic::PassOutcome;
use crate::output::ExtractionResult;
use crate::pipeline::chain::run_chain;
use crate::pipeline::input::AnalysisRequest;
use crate::pipeline::llm::{ModelCaller, ModelRequest};
use crate::pipeline::normalize::dedupe;
use crate::prompts::synthesis_prompt;
use tracing::{debug, warn};

pub async fn synthesize(
    caller: &dyn ModelCaller,
    config: &AnalysisConfig,
    request: &AnalysisRequest,
    merged: ExtractionResult,
) -> PassOutcome {
    if !config.synthesis {
        return PassOutcome::skipped(merged);
    }
    let models = config.synthesis_chain();
    let ocr_text = if config.mode.uses_ocr() {
        request.report_text.as_str()
    } else {
        ""
    };
    let model_request = ModelRequest::text_only(synthesis_prompt(&merged, ocr_text));

    match run_chain(caller, &models, &model_request, "synthesis").await {
        Ok(success) => {
            debug!(
                "Synthesis via {}: {} recommendations",
                success.model,
                success.value.recommendations.len()
            );
            let result = apply_synthesis(merged, success.value.clone());
            PassOutcome::applied(result, &success)
        }
        Err(failure) => {
            warn!("Synthesis failed, keeping merged result: {}", failure);
            PassOutcome::kept(merged, failure)
        }
    }
}

/// Take recommendations, summary and disclaimer from `synthesized`;
/// everything else from `base`.
pub fn apply_synthesis(base: ExtractionResult, synthesized: ExtractionResult) -> ExtractionResult {
    dedupe(ExtractionResult {
        biomarkers: base.biomarkers,
        recommendations: synthesized.recommendations,
        summary: synthesized.summary,
        disclaimer: synthesized.disclaimer,
    })
}
