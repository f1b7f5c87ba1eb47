//! Pipeline stages for lab-report extraction.
//!
//! Each submodule implements exactly one step, so each can be tested
//! without a live model and swapped independently (another caller backend,
//! another completeness heuristic).
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ batch ──▶ encode ──▶ llm ──▶ postprocess ──▶ normalize
//! (JSON)    (pages)   (data URL) (VLM)   (JSON object)   (schema + dedupe)
//!
//! chain ─▶ completeness ─▶ reconcile ─▶ merge ─▶ synthesize
//! ```
//!
//! 1. [`input`] — lenient request parsing, OCR subset per batch
//! 2. [`batch`] — ordered page batches with 1-based labels
//! 3. [`encode`] — payload clean-up and MIME sniffing for image parts
//! 4. [`llm`] / [`provider`] — one call to one model; the only stages with
//!    network I/O
//! 5. [`postprocess`] — message content → JSON object
//! 6. [`normalize`] — schema validation, defaults, intra-result dedupe
//! 7. [`chain`] — ordered model fallback
//! 8. [`completeness`] — sparse-batch heuristic
//! 9. [`reconcile`] / [`synthesize`] — optional corrective passes
//! 10. [`merge`] — cross-batch merge in page order

pub mod batch;
pub mod chain;
pub mod completeness;
pub mod encode;
pub mod input;
pub mod llm;
pub mod merge;
pub mod normalize;
pub mod postprocess;
pub mod provider;
pub mod reconcile;
pub mod synthesize;
