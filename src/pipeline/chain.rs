//! Fallback chain runner.
//!
//! Models are tried strictly in order. The first response that survives
//! [`normalize`] wins; every failure before it is kept for the trail. No
//! model is called twice: chain order is the only retry strategy.

use crate::diagnostic::{ChainFailure, ChainSuccess, ModelAttempt};
use crate::output::ExtractionResult;
use crate::pipeline::llm::{ModelCaller, ModelRequest};
use crate::pipeline::normalize::normalize;
use tracing::{debug, warn};

/// Run `request` through `models` until one yields a schema-valid result.
///
/// `stage` only labels log lines ("extraction", "reconciliation", …).
pub async fn run_chain(
    caller: &dyn ModelCaller,
    models: &[String],
    request: &ModelRequest,
    stage: &str,
) -> Result<ChainSuccess<ExtractionResult>, ChainFailure> {
    debug!("{} chain: {:?} ({} images)", stage, models, request.images.len());
    let mut failures = Vec::new();

    for model in models {
        let outcome = match caller.call(model, request).await {
            Ok(raw) => normalize(&raw),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => {
                debug!(
                    "{} via {}: {} biomarkers, {} recommendations",
                    stage,
                    model,
                    result.biomarkers.len(),
                    result.recommendations.len()
                );
                return Ok(ChainSuccess {
                    value: result,
                    model: model.clone(),
                    failures,
                });
            }
            Err(error) => {
                warn!("{} via {} failed: {}", stage, model, error);
                failures.push(ModelAttempt {
                    model: model.clone(),
                    error,
                });
            }
        }
    }

    Err(ChainFailure { attempts: failures })
}
