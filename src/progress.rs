//! Progress-callback trait for per-batch analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through page batches.
//!
//! # Example
//!
//! ```rust
//! use lablens::{AnalysisConfig, AnalysisProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, batch: usize, total: usize, biomarkers: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("batch {batch}/{total}: {biomarkers} biomarkers");
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the analysis pipeline as it processes each batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Batch numbers are 1-based.
///
/// # Thread safety
///
/// Batches run sequentially, but callbacks may be invoked from any tokio
/// worker thread, hence `Send + Sync`.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before the first batch.
    fn on_analysis_start(&self, total_batches: usize) {
        let _ = total_batches;
    }

    /// Called before the extraction chain runs for a batch.
    ///
    /// * `pages` — the 1-based image labels in this batch
    fn on_batch_start(&self, batch: usize, total_batches: usize, pages: &[usize]) {
        let _ = (batch, total_batches, pages);
    }

    /// Called when a sparse batch is about to be re-extracted page by page.
    fn on_completeness_retry(&self, batch: usize, biomarkers: usize) {
        let _ = (batch, biomarkers);
    }

    /// Called when a batch produced a result (after reconciliation).
    fn on_batch_complete(&self, batch: usize, total_batches: usize, biomarkers: usize) {
        let _ = (batch, total_batches, biomarkers);
    }

    /// Called when every extraction model failed for a batch.
    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called after the synthesis pass; `applied` is false when it was
    /// skipped or every model failed.
    fn on_synthesis(&self, applied: bool) {
        let _ = applied;
    }

    /// Called once when the run ends, successfully or not.
    fn on_analysis_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
