//! Reconciliation pass: a second model checks a batch extraction against
//! the OCR text and images and returns a corrected result.
//!
//! Runs on the reconciliation chain (fallbacks before the primary). Never
//! fatal: if every model fails the batch keeps its previous result.

use crate::config::{AnalysisConfig, AnalysisMode};
use crate::diagnostic::PassOutcome;
use crate::output::ExtractionResult;
use crate::pipeline::batch::PageBatch;
use crate::pipeline::chain::run_chain;
use crate::pipeline::input::AnalysisRequest;
use crate::pipeline::llm::{ModelCaller, ModelRequest};
use crate::prompts::{image_parts, reconciliation_prompt};
use tracing::{debug, warn};

/// Skipped when disabled, in visual-only mode, or with an empty chain.
pub async fn reconcile(
    caller: &dyn ModelCaller,
    config: &AnalysisConfig,
    request: &AnalysisRequest,
    batch: &PageBatch,
    existing: ExtractionResult,
) -> PassOutcome {
    if !config.reconciliation || config.mode == AnalysisMode::VisualOnly {
        return PassOutcome::skipped(existing);
    }
    let models = config.reconciliation_chain();
    if models.is_empty() {
        return PassOutcome::skipped(existing);
    }

    let ocr_text = request.report_text_for_images(&batch.labels);
    let model_request = ModelRequest {
        prompt: reconciliation_prompt(&existing, &ocr_text, &batch.labels, batch.total_pages),
        images: image_parts(request, batch, config.mode),
    };

    match run_chain(caller, &models, &model_request, "reconciliation").await {
        Ok(success) => {
            debug!(
                "Pages {:?}: reconciled via {} ({} → {} biomarkers)",
                batch.labels,
                success.model,
                existing.biomarkers.len(),
                success.value.biomarkers.len()
            );
            PassOutcome::applied(success.value.clone(), &success)
        }
        Err(failure) => {
            warn!(
                "Pages {:?}: reconciliation failed, keeping extraction: {}",
                batch.labels, failure
            );
            PassOutcome::kept(existing, failure)
        }
    }
}
