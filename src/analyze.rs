//! Analysis entry points and the batch orchestrator.
//!
//! ## Flow
//!
//! ```text
//! request ──▶ batches ──▶ per batch:  extraction chain
//!                                     └▶ completeness retry (single images)
//!                                     └▶ reconciliation
//!         ──▶ merge in page order ──▶ synthesis ──▶ (result, trail)
//! ```
//!
//! Batches run strictly in page order and the first batch whose extraction
//! chain is exhausted fails the whole request; no partial result is
//! returned. Reconciliation and synthesis only ever degrade to the result
//! they were given.

use crate::config::{AnalysisConfig, AnalysisMode, Provider};
use crate::diagnostic::{failure_trail, BatchReport, ChainFailure, ChainSuccess, SuccessTrail};
use crate::error::AnalyzeError;
use crate::output::{into_trail, AnalysisOutput, AnalysisStats, ExtractionResult};
use crate::pipeline::batch::PageBatch;
use crate::pipeline::chain::run_chain;
use crate::pipeline::input::{read_request, AnalysisRequest};
use crate::pipeline::llm::{CallOptions, ModelCaller, ModelRequest, OpenAiCompatibleCaller};
use crate::pipeline::merge::merge_batches;
use crate::pipeline::provider::ProviderFactoryCaller;
use crate::pipeline::reconcile::reconcile;
use crate::pipeline::synthesize::synthesize;
use crate::progress::{AnalysisProgressCallback, NoopProgressCallback};
use crate::prompts::{extraction_prompt, image_parts};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

static NOOP_PROGRESS: NoopProgressCallback = NoopProgressCallback;

/// Runs the full pipeline for one request at a time.
///
/// Holds no per-request state, so one `Analyzer` can serve concurrent
/// requests.
pub struct Analyzer {
    config: AnalysisConfig,
    caller: Arc<dyn ModelCaller>,
}

impl Analyzer {
    /// Resolve the model caller for `config`.
    ///
    /// # Errors
    /// [`AnalyzeError::ProviderNotConfigured`] when the active provider has
    /// no credential. No remote call is made in that case.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalyzeError> {
        let caller = resolve_caller(&config)?;
        Ok(Analyzer { config, caller })
    }

    /// Use an explicit caller, ignoring the configured provider.
    pub fn with_caller(config: AnalysisConfig, caller: Arc<dyn ModelCaller>) -> Self {
        Analyzer { config, caller }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze one request.
    ///
    /// # Errors
    /// * [`AnalyzeError::InvalidRequest`] — no images
    /// * [`AnalyzeError::MissingOcrText`] — OCR-only mode without OCR text
    /// * [`AnalyzeError::ExtractionFailed`] — a batch exhausted its chain;
    ///   the message is the full diagnostic trail
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutput, AnalyzeError> {
        let outcome = self.run(request).await;
        self.progress().on_analysis_complete(outcome.is_ok());
        outcome
    }

    async fn run(&self, request: &AnalysisRequest) -> Result<AnalysisOutput, AnalyzeError> {
        let start = Instant::now();
        let provider = self.config.provider.label().to_string();
        let mode = self.config.mode;

        if request.images.is_empty() {
            return Err(AnalyzeError::InvalidRequest(
                "images must be a non-empty array".into(),
            ));
        }
        if mode == AnalysisMode::OcrOnly && !request.has_ocr_text() {
            return Err(AnalyzeError::MissingOcrText { provider });
        }

        let batched = mode.uses_images() && request.images.len() > self.config.batch_size;
        let batches = if batched {
            PageBatch::split(&request.images, self.config.batch_size)
        } else {
            vec![PageBatch::whole(&request.images)]
        };
        let total = batches.len();
        info!(
            "Analyzing {} images in {} batch(es) via {} ({})",
            request.images.len(),
            total,
            provider,
            mode.label()
        );
        self.progress().on_analysis_start(total);

        let mut stats = AnalysisStats {
            total_images: request.images.len(),
            batches: total,
            ..Default::default()
        };
        let mut results = Vec::with_capacity(total);
        let mut reports = Vec::with_capacity(total);

        for (i, batch) in batches.iter().enumerate() {
            let n = i + 1;
            info!("Batch {}/{}: pages {:?} of {}", n, total, batch.labels, batch.total_pages);
            self.progress().on_batch_start(n, total, &batch.labels);

            match self.process_batch(request, batch, n, &mut stats).await {
                Ok((result, report)) => {
                    info!(
                        "Batch {}/{}: {} biomarkers via {}",
                        n,
                        total,
                        result.biomarkers.len(),
                        report
                    );
                    self.progress()
                        .on_batch_complete(n, total, result.biomarkers.len());
                    results.push(result);
                    reports.push(report);
                }
                Err(failure) => {
                    warn!("Batch {}/{} failed: {}", n, total, failure);
                    self.progress().on_batch_error(n, total, &failure.to_string());
                    let pages = batched.then_some(batch.labels.as_slice());
                    return Err(AnalyzeError::ExtractionFailed {
                        trail: failure_trail(&provider, pages, &failure),
                    });
                }
            }
        }

        let merged = if batched {
            merge_batches(&results)
        } else {
            results.pop()
        }
        .ok_or_else(|| AnalyzeError::Internal("no batch results to merge".into()))?;

        let synthesis = synthesize(self.caller.as_ref(), &self.config, request, merged).await;
        stats.model_calls += synthesis.calls;
        stats.failed_calls += synthesis.failed_calls;
        stats.synthesized = synthesis.applied;
        self.progress().on_synthesis(synthesis.applied);

        let trail = SuccessTrail {
            provider,
            batched,
            batches: reports,
            synthesis_error: synthesis.failure,
        };
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Analysis complete: {} biomarkers, {} recommendations, {} calls ({} failed), {}ms",
            synthesis.result.biomarkers.len(),
            synthesis.result.recommendations.len(),
            stats.model_calls,
            stats.failed_calls,
            stats.duration_ms
        );

        Ok(AnalysisOutput {
            result: synthesis.result,
            diagnostic: trail.to_string(),
            stats,
        })
    }

    /// Extraction, optional completeness retry, then reconciliation.
    async fn process_batch(
        &self,
        request: &AnalysisRequest,
        batch: &PageBatch,
        n: usize,
        stats: &mut AnalysisStats,
    ) -> Result<(ExtractionResult, BatchReport), ChainFailure> {
        let models = self.config.model_chain();
        let extraction = self.extract(request, batch, &models).await;
        record(stats, &extraction);
        let extraction = extraction?;

        let mut report = BatchReport::new(batch.labels.clone(), extraction.trace());
        let mut result = extraction.value;

        // Counts request images, blank payloads included. In OCR-only mode each
        // single-image retry still narrows the OCR text to that image's pages.
        if batch.len() >= 2 && self.config.completeness.is_incomplete(&result, batch.len()) {
            info!(
                "Batch {}: only {} biomarkers for {} images, retrying one image at a time",
                n,
                result.biomarkers.len(),
                batch.len()
            );
            self.progress()
                .on_completeness_retry(n, result.biomarkers.len());
            stats.completeness_retries += 1;
            match self.retry_single_pages(request, batch, &models, stats).await {
                Some((retried, retry_models)) => {
                    result = retried;
                    report.retry_models = retry_models;
                }
                None => warn!("Batch {}: single-image retry failed, keeping batch result", n),
            }
        }

        let pass = reconcile(self.caller.as_ref(), &self.config, request, batch, result).await;
        stats.model_calls += pass.calls;
        stats.failed_calls += pass.failed_calls;
        if pass.applied {
            stats.reconciled_batches += 1;
        }
        report.reconciliation_error = pass.failure;
        Ok((pass.result, report))
    }

    /// Re-extract every image of `batch` on its own and merge in page order.
    ///
    /// `None` as soon as any single image exhausts the chain.
    async fn retry_single_pages(
        &self,
        request: &AnalysisRequest,
        batch: &PageBatch,
        models: &[String],
        stats: &mut AnalysisStats,
    ) -> Option<(ExtractionResult, Vec<String>)> {
        let singles = batch.single_pages();
        let mut outcomes = stream::iter(singles.iter().map(|single| self.extract(request, single, models)))
            .buffered(self.config.retry_concurrency.max(1));

        let mut chunks = Vec::with_capacity(singles.len());
        let mut retry_models = Vec::with_capacity(singles.len());
        while let Some(outcome) = outcomes.next().await {
            record(stats, &outcome);
            match outcome {
                Ok(success) => {
                    retry_models.push(success.model);
                    chunks.push(success.value);
                }
                Err(failure) => {
                    debug!("Single-image retry failed: {}", failure);
                    return None;
                }
            }
        }
        merge_batches(&chunks).map(|merged| (merged, retry_models))
    }

    async fn extract(
        &self,
        request: &AnalysisRequest,
        batch: &PageBatch,
        models: &[String],
    ) -> Result<ChainSuccess<ExtractionResult>, ChainFailure> {
        let mode = self.config.mode;
        let ocr_text = if mode.uses_ocr() {
            request.report_text_for_images(&batch.labels)
        } else {
            String::new()
        };
        let model_request = ModelRequest {
            prompt: extraction_prompt(&request.profile, mode, &ocr_text, &batch.labels, batch.total_pages),
            images: image_parts(request, batch, mode),
        };
        run_chain(self.caller.as_ref(), models, &model_request, "extraction").await
    }

    fn progress(&self) -> &dyn AnalysisProgressCallback {
        match self.config.progress_callback {
            Some(ref cb) => cb.as_ref(),
            None => &NOOP_PROGRESS,
        }
    }
}

fn record<T>(stats: &mut AnalysisStats, outcome: &Result<ChainSuccess<T>, ChainFailure>) {
    let (calls, failed) = match outcome {
        Ok(success) => (success.calls(), success.failures.len()),
        Err(failure) => (failure.attempts.len(), failure.attempts.len()),
    };
    stats.model_calls += calls;
    stats.failed_calls += failed;
}

/// Pick the caller for the configured provider.
///
/// 1. **Pre-built caller** (`config.caller`) — used as-is
/// 2. **Native provider** — `edgequake_llm` provider factory, which reads
///    its own API-key variables
/// 3. **OpenRouter / Qwen** — OpenAI-compatible HTTP caller; the key comes
///    from the config or the provider's environment variables
fn resolve_caller(config: &AnalysisConfig) -> Result<Arc<dyn ModelCaller>, AnalyzeError> {
    if let Some(ref caller) = config.caller {
        return Ok(Arc::clone(caller));
    }

    let options = CallOptions::from_config(config);
    let provider = &config.provider;

    if let Provider::Native(ref name) = provider {
        let chain = config.model_chain();
        let first_model = chain.first().ok_or_else(|| {
            AnalyzeError::InvalidConfig(format!("No models configured for provider '{name}'"))
        })?;
        return Ok(Arc::new(ProviderFactoryCaller::new(name.clone(), first_model, options)?));
    }

    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| AnalyzeError::ProviderNotConfigured {
            provider: provider.label().to_string(),
            hint: provider.api_key_env().first().copied().unwrap_or("API key").to_string(),
        })?;
    let endpoint = config.endpoint().ok_or_else(|| {
        AnalyzeError::InvalidConfig(format!("No endpoint for provider '{}'", provider.label()))
    })?;

    let mut caller = OpenAiCompatibleCaller::new(endpoint, api_key, options)?;
    if *provider == Provider::OpenRouter {
        caller = caller
            .with_header("HTTP-Referer", config.app_url.clone())
            .with_header("X-Title", config.app_name.clone());
    }
    Ok(Arc::new(caller))
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Analyze a lab-report request.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(AnalysisOutput)` with the merged result, the diagnostic trail and
/// run statistics. Failed reconciliation or synthesis passes only show up
/// in the trail.
///
/// # Errors
/// See [`Analyzer::new`] and [`Analyzer::analyze`].
pub async fn analyze(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalyzeError> {
    Analyzer::new(config.clone())?.analyze(request).await
}

/// Read a request JSON file and analyze it.
pub async fn analyze_file(
    path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalyzeError> {
    let request = read_request(path.as_ref()).await?;
    analyze(&request, config).await
}

/// `(result | None, diagnostic)`: the shape consumed by transport layers.
///
/// A `None` result means total failure and the string explains why.
pub async fn analyze_with_trail(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
) -> (Option<ExtractionResult>, String) {
    into_trail(analyze(request, config).await)
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally; do not call from inside
/// an async context.
pub fn analyze_sync(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalyzeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalyzeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(request, config))
}
