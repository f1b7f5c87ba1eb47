//! Error types for the lablens library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AnalyzeError`] — **Fatal**: the analysis cannot produce a result at
//!   all (provider not configured, malformed request, every model failed on
//!   a page batch). Returned as `Err(AnalyzeError)` from the top-level
//!   `analyze*` functions.
//!
//! * [`ModelCallError`] — **Non-fatal**: one model call failed (HTTP error,
//!   timeout, unparsable or non-conforming output). The fallback chain
//!   records it and moves on to the next model; it only becomes visible to
//!   the caller through the diagnostic trail.

use std::path::PathBuf;
use thiserror::Error;

/// Longest slice of an HTTP error body kept in a [`ModelCallError`].
pub const MAX_ERROR_BODY_CHARS: usize = 300;

/// All fatal errors returned by the lablens library.
///
/// Per-call failures use [`ModelCallError`] and are folded into the
/// diagnostic trail rather than propagated here.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// No usable credential for the active provider. No remote call was made.
    #[error("{provider} disabled (missing {hint})")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Request errors ────────────────────────────────────────────────────
    /// The request body is not usable (no images, not a JSON object, …).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// OCR-only mode was selected but the request carries no OCR text.
    #[error("{provider} OCR-only mode enabled but no OCR text was provided")]
    MissingOcrText { provider: String },

    /// Could not read the request file.
    #[error("Failed to read request '{path}': {source}")]
    RequestReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Every model in the extraction chain failed for a page batch.
    ///
    /// The message is the full diagnostic trail of the run.
    #[error("{trail}")]
    ExtractionFailed { trail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of a single model call.
///
/// The `Display` form is what appears after `"<model>: "` in the
/// diagnostic trail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelCallError {
    /// Network failure or non-success HTTP status.
    #[error("{}", transport_message(*status, body))]
    Transport { status: Option<u16>, body: String },

    /// The call did not complete within the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response had no usable message content, or the content was not a
    /// JSON object.
    #[error("{0}")]
    Format(String),

    /// The JSON object did not match the extraction schema.
    #[error("{0}")]
    Schema(String),
}

impl ModelCallError {
    /// Build a transport error from an HTTP status and raw body, truncating
    /// the body to [`MAX_ERROR_BODY_CHARS`].
    pub fn http(status: u16, body: &str) -> Self {
        ModelCallError::Transport {
            status: Some(status),
            body: truncate_chars(body, MAX_ERROR_BODY_CHARS),
        }
    }

    /// Build a transport error for a failure with no HTTP status.
    pub fn network(message: impl Into<String>) -> Self {
        ModelCallError::Transport {
            status: None,
            body: message.into(),
        }
    }
}

fn transport_message(status: Option<u16>, body: &str) -> String {
    match status {
        Some(code) => format!("HTTP {code} {body}"),
        None => body.to_string(),
    }
}

/// Truncate on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
