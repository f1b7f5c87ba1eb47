//! Input resolution: turn a client request body into an [`AnalysisRequest`].
//!
//! Mobile clients have shipped several spellings of the OCR fields over
//! time (`reportText`, `ocr_text`, …), so parsing is deliberately lenient:
//! the first alias carrying usable content wins, malformed entries are
//! skipped rather than rejected, and only a missing or empty `images` array
//! is fatal.

use crate::error::AnalyzeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

const REPORT_TEXT_KEYS: [&str; 4] = ["reportText", "report_text", "ocrText", "ocr_text"];
const TEXT_BY_PAGE_KEYS: [&str; 4] = [
    "reportTextByPage",
    "report_text_by_page",
    "ocrTextByPage",
    "ocr_text_by_page",
];
const STITCHED_GROUP_KEYS: [&str; 4] = [
    "stitchedPageGroups",
    "stitched_page_groups",
    "pageGroups",
    "page_groups",
];

/// OCR text of one original report page (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page: usize,
    pub text: String,
}

/// Optional user context forwarded to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub gender: Option<String>,
    pub age_band: Option<String>,
    pub weight_band: Option<String>,
}

/// A validated analysis request.
///
/// `images` order is the semantic page order and is preserved by every
/// pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct AnalysisRequest {
    /// Base64-encoded page images, in page order.
    pub images: Vec<String>,
    /// Full-report OCR text (trimmed; empty when absent).
    pub report_text: String,
    /// Per-page OCR text, sorted by page.
    pub report_text_by_page: Vec<PageText>,
    /// For image `i` (0-based), the original page numbers it covers.
    pub stitched_page_groups: Vec<Vec<usize>>,
    pub profile: UserProfile,
}

impl TryFrom<Value> for AnalysisRequest {
    type Error = AnalyzeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        AnalysisRequest::from_json(&value)
    }
}

impl AnalysisRequest {
    /// Build a request from an already-parsed JSON body.
    pub fn from_json(payload: &Value) -> Result<Self, AnalyzeError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| AnalyzeError::InvalidRequest("Request JSON is invalid".into()))?;

        let images: Vec<String> = match obj.get("images") {
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect(),
            _ => {
                return Err(AnalyzeError::InvalidRequest(
                    "images must be a non-empty array".into(),
                ))
            }
        };

        let request = AnalysisRequest {
            images,
            report_text: extract_report_text(payload),
            report_text_by_page: extract_report_text_by_page(payload),
            stitched_page_groups: extract_stitched_page_groups(payload),
            profile: extract_profile(payload),
        };
        debug!(
            "Parsed request: {} images, {} OCR chars, {} per-page texts, {} stitched groups",
            request.images.len(),
            request.report_text.len(),
            request.report_text_by_page.len(),
            request.stitched_page_groups.len()
        );
        Ok(request)
    }

    /// Parse a raw request body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AnalyzeError> {
        let payload: Value = serde_json::from_slice(bytes)
            .map_err(|_| AnalyzeError::InvalidRequest("Request JSON is invalid".into()))?;
        Self::from_json(&payload)
    }

    /// `true` when any OCR text (full or per page) is available.
    pub fn has_ocr_text(&self) -> bool {
        !self.report_text.is_empty() || !self.report_text_by_page.is_empty()
    }

    /// Original page numbers covered by the given 1-based image labels.
    ///
    /// Without stitched groups, image `n` covers page `n`.
    pub fn raw_pages_for_images(&self, image_labels: &[usize]) -> Vec<usize> {
        let covered: BTreeSet<usize> = if self.stitched_page_groups.is_empty() {
            image_labels.iter().copied().filter(|&p| p > 0).collect()
        } else {
            image_labels
                .iter()
                .filter(|&&idx| idx >= 1)
                .filter_map(|&idx| self.stitched_page_groups.get(idx - 1))
                .flatten()
                .copied()
                .collect()
        };
        covered.into_iter().collect()
    }

    /// OCR text for a subset of images.
    ///
    /// Per-page text for the covered pages is rendered as `[Page N]` blocks;
    /// when no per-page text matches, the full report text is returned.
    pub fn report_text_for_images(&self, image_labels: &[usize]) -> String {
        if !self.report_text_by_page.is_empty() {
            let targets: BTreeSet<usize> = self.raw_pages_for_images(image_labels).into_iter().collect();
            let parts: Vec<String> = self
                .report_text_by_page
                .iter()
                .filter(|p| targets.contains(&p.page))
                .map(|p| format!("[Page {}]\n{}", p.page, p.text))
                .collect();
            if !parts.is_empty() {
                return parts.join("\n\n");
            }
        }
        self.report_text.clone()
    }

    /// Stitched group of a 1-based image label, if any.
    pub fn stitched_group(&self, image_label: usize) -> Option<&[usize]> {
        image_label
            .checked_sub(1)
            .and_then(|i| self.stitched_page_groups.get(i))
            .map(Vec::as_slice)
    }
}

/// Read and parse a request JSON file.
pub async fn read_request(path: &Path) -> Result<AnalysisRequest, AnalyzeError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| AnalyzeError::RequestReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
    AnalysisRequest::from_slice(&bytes)
}

fn extract_report_text(payload: &Value) -> String {
    REPORT_TEXT_KEYS
        .iter()
        .filter_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn extract_report_text_by_page(payload: &Value) -> Vec<PageText> {
    for key in TEXT_BY_PAGE_KEYS {
        let Some(Value::Array(items)) = payload.get(key) else {
            continue;
        };
        let mut pages: Vec<PageText> = items
            .iter()
            .filter_map(|item| {
                let page = as_positive_int(item.get("page")?)?;
                let text = item.get("text")?.as_str()?.trim();
                (!text.is_empty()).then(|| PageText {
                    page,
                    text: text.to_string(),
                })
            })
            .collect();
        if !pages.is_empty() {
            pages.sort_by_key(|p| p.page);
            return pages;
        }
    }
    Vec::new()
}

fn extract_stitched_page_groups(payload: &Value) -> Vec<Vec<usize>> {
    for key in STITCHED_GROUP_KEYS {
        let Some(Value::Array(items)) = payload.get(key) else {
            continue;
        };
        let groups: Vec<Vec<usize>> = items
            .iter()
            .filter_map(Value::as_array)
            .map(|group| {
                group
                    .iter()
                    .filter_map(as_positive_int)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect::<Vec<_>>()
            })
            .filter(|g| !g.is_empty())
            .collect();
        if !groups.is_empty() {
            return groups;
        }
    }
    Vec::new()
}

fn extract_profile(payload: &Value) -> UserProfile {
    let Some(profile) = payload.get("profile").filter(|p| p.is_object()) else {
        return UserProfile::default();
    };
    let field = |key: &str| match profile.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    UserProfile {
        gender: field("gender"),
        age_band: field("ageBand"),
        weight_band: field("weightBand"),
    }
}

/// Accepts integers, integral floats and numeric strings.
fn as_positive_int(value: &Value) -> Option<usize> {
    let n = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    usize::try_from(n).ok().filter(|&n| n > 0)
}
