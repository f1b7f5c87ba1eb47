//! # lablens
//!
//! Extract structured biomarkers from photographed lab reports using Vision
//! Language Models (VLMs), with OCR text as the primary source when the
//! client supplies it.
//!
//! ## Why this crate?
//!
//! A single VLM call over a ten-page report drops rows, mixes the first and
//! last pages, and sometimes returns prose instead of JSON. This crate wraps
//! the call in the safeguards that make the output usable: ordered page
//! batches, per-call model fallback, a sparse-result retry at single-image
//! granularity, a reconciliation pass by a second model, and a final
//! synthesis pass for the summary and recommendations.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request JSON
//!  │
//!  ├─ 1. Input       images + OCR text (+ per-page text, stitched groups, profile)
//!  ├─ 2. Batch       consecutive page batches (default 2 images)
//!  ├─ 3. Extract     fallback chain: primary → fallback 1 → fallback 2 → …
//!  ├─ 4. Complete    sparse batch? re-extract one image at a time
//!  ├─ 5. Reconcile   a different model corrects the batch result
//!  ├─ 6. Merge       dedupe across batches, page order preserved
//!  ├─ 7. Synthesize  summary + recommendations from all biomarkers
//!  └─ 8. Output      ExtractionResult + diagnostic trail
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lablens::{analyze, AnalysisConfig, AnalysisRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider key read from OPENROUTER_API_KEY
//!     let config = AnalysisConfig::default();
//!     let body = std::fs::read("request.json")?;
//!     let request = AnalysisRequest::from_slice(&body)?;
//!     let output = analyze(&request, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.result)?);
//!     eprintln!("{}", output.diagnostic);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `lablens` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! lablens = { version = "0.3", default-features = false }
//! ```
//!
//! ## Providers
//!
//! | Provider | Key | Default chain |
//! |----------|-----|---------------|
//! | OpenRouter | `OPENROUTER_API_KEY` | nemotron-nano-12b-v2-vl → qwen3-vl-30b → qwen3-vl-235b → gemma-3-27b |
//! | Qwen (DashScope) | `QWEN_API_KEY` / `DASHSCOPE_API_KEY` | qwen-vl-max → qwen-vl-plus → qwen2.5-vl-72b |
//! | any `edgequake-llm` provider | provider-specific | configured explicitly |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_file, analyze_sync, analyze_with_trail, Analyzer};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, AnalysisMode, Provider};
pub use error::{AnalyzeError, ModelCallError};
pub use output::{AnalysisOutput, AnalysisStats, Biomarker, ExtractionResult, Recommendation};
pub use pipeline::completeness::{CompletenessPolicy, MinimumPerImage, NeverRetry};
pub use pipeline::input::{AnalysisRequest, PageText, UserProfile};
pub use pipeline::llm::{ModelCaller, ModelRequest};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
