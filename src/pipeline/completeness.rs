//! Completeness heuristic for multi-image batches.
//!
//! Large batches make models skip rows: a two-page panel sometimes comes
//! back with three markers when the pages hold thirty. When a policy flags
//! a batch, the orchestrator re-extracts it one image at a time and merges
//! the pieces. The check is a tunable guess, not a guarantee, so it sits
//! behind a trait and can be swapped per deployment.

use crate::output::ExtractionResult;

/// Decides whether a batch result looks too sparse to trust.
pub trait CompletenessPolicy: Send + Sync {
    /// `image_count` is the number of images the batch was extracted from.
    fn is_incomplete(&self, result: &ExtractionResult, image_count: usize) -> bool;
}

/// Flags multi-image batches that return fewer than `per_image` biomarkers
/// per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumPerImage {
    per_image: usize,
}

impl MinimumPerImage {
    /// Floors below 1 are raised to 1.
    pub fn new(per_image: usize) -> Self {
        MinimumPerImage {
            per_image: per_image.max(1),
        }
    }

    pub fn per_image(&self) -> usize {
        self.per_image
    }
}

impl Default for MinimumPerImage {
    fn default() -> Self {
        MinimumPerImage::new(2)
    }
}

impl CompletenessPolicy for MinimumPerImage {
    fn is_incomplete(&self, result: &ExtractionResult, image_count: usize) -> bool {
        image_count >= 2 && result.biomarkers.len() < self.per_image.saturating_mul(image_count)
    }
}

/// Never triggers a retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl CompletenessPolicy for NeverRetry {
    fn is_incomplete(&self, _result: &ExtractionResult, _image_count: usize) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Biomarker;

    fn with_markers(n: usize) -> ExtractionResult {
        ExtractionResult {
            biomarkers: (0..n)
                .map(|i| Biomarker {
                    name: format!("m{i}"),
                    value: "1".into(),
                    status: "Optimal".into(),
                    explanation: "x".into(),
                })
                .collect(),
            recommendations: vec![],
            summary: "s".into(),
            disclaimer: "d".into(),
        }
    }

    #[test]
    fn three_markers_for_two_images_is_incomplete() {
        let policy = MinimumPerImage::new(2);
        assert!(policy.is_incomplete(&with_markers(3), 2));
        assert!(!policy.is_incomplete(&with_markers(4), 2));
    }

    #[test]
    fn single_image_batches_never_trigger() {
        let policy = MinimumPerImage::new(5);
        assert!(!policy.is_incomplete(&with_markers(0), 1));
        assert!(!policy.is_incomplete(&with_markers(0), 0));
    }

    #[test]
    fn floor_is_at_least_one() {
        let policy = MinimumPerImage::new(0);
        assert_eq!(policy.per_image(), 1);
        assert!(policy.is_incomplete(&with_markers(1), 2));
    }

    #[test]
    fn never_retry_is_inert() {
        assert!(!NeverRetry.is_incomplete(&with_markers(0), 10));
    }
}
