//! Diagnostic trail: the human-readable record of every model attempted.
//!
//! Stages return typed values ([`ChainSuccess`], [`ChainFailure`],
//! [`BatchReport`]) and the orchestrator renders them into one string at
//! the end of the run. Nothing here performs I/O.
//!
//! ```text
//! OpenRouter batch success (ordered pages) via m1 -> m2 (completeness-retry via m1 -> m1) | summary/reco:m1: HTTP 429 …
//! ```

use crate::error::ModelCallError;
use crate::output::ExtractionResult;
use std::fmt;

/// One failed call inside a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAttempt {
    pub model: String,
    pub error: ModelCallError,
}

impl fmt::Display for ModelAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

fn join_attempts(attempts: &[ModelAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Every model in a chain failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainFailure {
    pub attempts: Vec<ModelAttempt>,
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("no models configured");
        }
        f.write_str(&join_attempts(&self.attempts))
    }
}

/// The first model in a chain that produced a valid result.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSuccess<T> {
    pub value: T,
    pub model: String,
    /// Models tried before `model`, in order.
    pub failures: Vec<ModelAttempt>,
}

impl<T> ChainSuccess<T> {
    /// `model`, or `model (after a: e | b: e)` when earlier models failed.
    pub fn trace(&self) -> String {
        if self.failures.is_empty() {
            self.model.clone()
        } else {
            format!("{} (after {})", self.model, join_attempts(&self.failures))
        }
    }

    /// Calls issued to get this result.
    pub fn calls(&self) -> usize {
        self.failures.len() + 1
    }
}

/// How one page batch was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// 1-based image labels in the batch.
    pub pages: Vec<usize>,
    /// Trace of the extraction chain.
    pub extraction: String,
    /// Models that served each single-image retry, when the completeness
    /// retry replaced the batch result.
    pub retry_models: Vec<String>,
    /// Set when every reconciliation model failed.
    pub reconciliation_error: Option<ChainFailure>,
}

impl BatchReport {
    pub fn new(pages: Vec<usize>, extraction: String) -> Self {
        BatchReport {
            pages,
            extraction,
            retry_models: Vec::new(),
            reconciliation_error: None,
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extraction)?;
        if !self.retry_models.is_empty() {
            write!(f, " (completeness-retry via {})", self.retry_models.join(" -> "))?;
        }
        if let Some(ref err) = self.reconciliation_error {
            write!(f, " | reconciliation:{err}")?;
        }
        Ok(())
    }
}

/// Result of an optional corrective pass (reconciliation or synthesis).
///
/// A pass never fails its caller: when every model fails, `result` is the
/// input unchanged and `failure` explains why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub result: ExtractionResult,
    /// True when a model's output replaced (part of) the input.
    pub applied: bool,
    pub failure: Option<ChainFailure>,
    pub calls: usize,
    pub failed_calls: usize,
}

impl PassOutcome {
    /// The pass did not run.
    pub fn skipped(result: ExtractionResult) -> Self {
        PassOutcome {
            result,
            applied: false,
            failure: None,
            calls: 0,
            failed_calls: 0,
        }
    }

    pub fn applied(result: ExtractionResult, success: &ChainSuccess<ExtractionResult>) -> Self {
        PassOutcome {
            result,
            applied: true,
            failure: None,
            calls: success.calls(),
            failed_calls: success.failures.len(),
        }
    }

    pub fn kept(result: ExtractionResult, failure: ChainFailure) -> Self {
        let n = failure.attempts.len();
        PassOutcome {
            result,
            applied: false,
            failure: Some(failure).filter(|f| !f.attempts.is_empty()),
            calls: n,
            failed_calls: n,
        }
    }
}

/// Trail of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessTrail {
    pub provider: String,
    /// True when the request was split into several batches.
    pub batched: bool,
    pub batches: Vec<BatchReport>,
    /// Set when the synthesis pass ran and every model failed.
    pub synthesis_error: Option<ChainFailure>,
}

impl fmt::Display for SuccessTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let via = self
            .batches
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        if self.batched {
            write!(f, "{} batch success (ordered pages) via {}", self.provider, via)?;
        } else {
            write!(f, "{} success via {}", self.provider, via)?;
        }
        if let Some(ref err) = self.synthesis_error {
            write!(f, " | summary/reco:{err}")?;
        }
        Ok(())
    }
}

/// Trail of a run that failed on a primary extraction.
///
/// `pages` is `Some` in batch mode, naming the batch that exhausted its
/// chain.
pub fn failure_trail(provider: &str, pages: Option<&[usize]>, failure: &ChainFailure) -> String {
    match pages {
        Some(pages) => format!("{provider} batch mode failed. pages {pages:?}: {failure}"),
        None => format!("{provider} failed. {failure}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(model: &str, status: u16) -> ModelAttempt {
        ModelAttempt {
            model: model.into(),
            error: ModelCallError::http(status, "busy"),
        }
    }

    #[test]
    fn chain_failure_joins_attempts() {
        let failure = ChainFailure {
            attempts: vec![
                attempt("a", 503),
                ModelAttempt {
                    model: "b".into(),
                    error: ModelCallError::Format("Model output is not an object".into()),
                },
            ],
        };
        assert_eq!(
            failure.to_string(),
            "a: HTTP 503 busy | b: Model output is not an object"
        );
        assert_eq!(ChainFailure::default().to_string(), "no models configured");
    }

    #[test]
    fn success_trace_mentions_earlier_failures() {
        let ok = ChainSuccess {
            value: (),
            model: "b".into(),
            failures: vec![attempt("a", 503)],
        };
        assert_eq!(ok.trace(), "b (after a: HTTP 503 busy)");
        assert_eq!(ok.calls(), 2);

        let clean = ChainSuccess {
            value: (),
            model: "a".into(),
            failures: vec![],
        };
        assert_eq!(clean.trace(), "a");
    }

    #[test]
    fn batch_report_display() {
        let mut report = BatchReport::new(vec![1, 2], "m1".into());
        assert_eq!(report.to_string(), "m1");

        report.retry_models = vec!["m1".into(), "m2".into()];
        report.reconciliation_error = Some(ChainFailure {
            attempts: vec![attempt("f1", 500)],
        });
        assert_eq!(
            report.to_string(),
            "m1 (completeness-retry via m1 -> m2) | reconciliation:f1: HTTP 500 busy"
        );
    }

    #[test]
    fn success_trail_single_and_batched() {
        let single = SuccessTrail {
            provider: "OpenRouter".into(),
            batched: false,
            batches: vec![BatchReport::new(vec![1], "m1".into())],
            synthesis_error: None,
        };
        assert_eq!(single.to_string(), "OpenRouter success via m1");

        let batched = SuccessTrail {
            provider: "Qwen".into(),
            batched: true,
            batches: vec![
                BatchReport::new(vec![1, 2], "m1".into()),
                BatchReport::new(vec![3], "m2".into()),
            ],
            synthesis_error: Some(ChainFailure {
                attempts: vec![attempt("m1", 429)],
            }),
        };
        assert_eq!(
            batched.to_string(),
            "Qwen batch success (ordered pages) via m1 -> m2 | summary/reco:m1: HTTP 429 busy"
        );
    }

    #[test]
    fn failure_trails() {
        let failure = ChainFailure {
            attempts: vec![attempt("m1", 500)],
        };
        assert_eq!(
            failure_trail("OpenRouter", Some(&[3, 4]), &failure),
            "OpenRouter batch mode failed. pages [3, 4]: m1: HTTP 500 busy"
        );
        assert_eq!(
            failure_trail("Qwen", None, &failure),
            "Qwen failed. m1: HTTP 500 busy"
        );
    }
}
