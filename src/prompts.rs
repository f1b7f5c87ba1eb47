//! Prompt builder for extraction, reconciliation and synthesis calls.
//!
//! Every prompt is mode-aware. When images are disabled the OCR text is the
//! only source and [`image_parts`] attaches nothing; when OCR is disabled a
//! sentinel marks it absent. Sub-batch prompts always carry the page range
//! so the model cannot mistake pages 3-4 for the start of the report.

use crate::config::AnalysisMode;
use crate::output::ExtractionResult;
use crate::pipeline::batch::PageBatch;
use crate::pipeline::encode::PageImage;
use crate::pipeline::input::{AnalysisRequest, UserProfile};
use crate::pipeline::llm::LabeledImage;
use serde::Serialize;

/// Output schema shared by every prompt.
pub const RESULT_SCHEMA: &str = r#"{"biomarkers":[{"name":"string","value":"string","status":"Optimal|High|Low|Unknown","explanation":"string"}],"recommendations":[{"name":"string","protocol":"string","reason":"string"}],"summary":"string","disclaimer":"string"}"#;

/// Stands in for the OCR text when OCR is disabled or empty.
pub const OCR_ABSENT: &str = "[OCR disabled or unavailable]";

const HYBRID_OCR_RULE: &str = "2) OCR text is the PRIMARY source for names/values/units/ranges. Images are SECONDARY and should be used to validate layout and recover missed rows.";
const OCR_ONLY_RULE: &str = "2) OCR text is the ONLY source for this run; no images are attached. Keep rows in the order they appear in the text.";
const VISUAL_ONLY_RULE: &str =
    "2) OCR is disabled for this run. Use only the provided images and page ordering.";

/// Prompt for the primary extraction of one batch (or the whole report).
pub fn extraction_prompt(
    profile: &UserProfile,
    mode: AnalysisMode,
    ocr_text: &str,
    pages: &[usize],
    total_pages: usize,
) -> String {
    let ocr_rule = match mode {
        AnalysisMode::Hybrid => HYBRID_OCR_RULE,
        AnalysisMode::OcrOnly => OCR_ONLY_RULE,
        AnalysisMode::VisualOnly => VISUAL_ONLY_RULE,
    };
    let ocr_payload = if mode.uses_ocr() && !ocr_text.trim().is_empty() {
        ocr_text
    } else {
        OCR_ABSENT
    };

    format!(
        "You are a medical lab report extraction assistant. Extract data exhaustively, not selectively. \
Return ONLY valid JSON with this schema: {RESULT_SCHEMA}. Do not include markdown fences.\n\
Rules:\n\
1) Extract ALL visible lab rows/test results, including normal values (do not return only abnormal values).\n\
{ocr_rule}\n\
3) Preserve on-page reading order and page order.\n\
4) If a test name appears on one page and its value/reference range continues on the next page, combine them into one biomarker entry.\n\
5) If the same biomarker appears multiple times for different dates/panels, keep separate entries and mention date/panel/page in explanation.\n\
6) If a row is partially unreadable but identifiable, include it with status=Unknown and explain what is missing.\n\
7) Do not invent values, units, or ranges.\n\
8) Do not emit duplicates caused by overlapping stitched page groups. Merge exact duplicates.\n\
9) Keep explanations short and factual.\n\
10) Summary must mention extraction coverage (e.g., full/partial) and any unreadable sections.\n\n\
User profile context: {profile}\n\
{page_context}\
Report text (OCR): {ocr_payload}\n",
        profile = to_json(profile),
        page_context = page_context(pages, total_pages),
    )
}

/// Prompt asking a second model to correct an existing extraction.
pub fn reconciliation_prompt(
    existing: &ExtractionResult,
    ocr_text: &str,
    pages: &[usize],
    total_pages: usize,
) -> String {
    let batch_context = if pages.is_empty() {
        String::new()
    } else {
        let total = if total_pages > 0 {
            format!(" out of {total_pages}")
        } else {
            String::new()
        };
        format!("Current batch image groups (ordered): {pages:?}{total}.\n")
    };
    format!(
        "You are a strict medical lab report reconciliation assistant.\n\
Task: compare OCR text + images against the existing extracted JSON and return a corrected FINAL JSON.\n\
Return ONLY valid JSON in the same schema.\n\
Rules:\n\
1) Add rows that were missed.\n\
2) Remove exact duplicates caused by overlap/page stitching.\n\
3) Fix wrong values/units/status if OCR clearly supports a correction.\n\
4) Do not invent rows or values.\n\
5) Preserve order as much as possible.\n\n\
{batch_context}\
OCR text:\n{ocr_text}\n\n\
Existing extracted JSON:\n{existing}\n",
        existing = to_json(existing),
    )
}

/// Prompt regenerating summary and recommendations from the merged
/// biomarkers. Always sent without images.
pub fn synthesis_prompt(existing: &ExtractionResult, ocr_text: &str) -> String {
    let ocr = if ocr_text.trim().is_empty() {
        "[OCR unavailable]"
    } else {
        ocr_text
    };
    format!(
        "You are a medical functional-health assistant.\n\
Task: Using the extracted lab biomarkers, generate:\n\
1) a concise health summary (what likely needs attention), and\n\
2) supplement recommendations with explicit protocol details.\n\
Return ONLY valid JSON in the SAME schema as input/output:\n\
{{\"biomarkers\":[...],\"recommendations\":[{{\"name\":\"string\",\"protocol\":\"string\",\"reason\":\"string\"}}],\"summary\":\"string\",\"disclaimer\":\"string\"}}\n\
Rules:\n\
1) Keep biomarkers unchanged unless obvious duplicate cleanup is needed.\n\
2) Recommendations should be INFERRED from biomarkers; they do NOT need to exist in the PDF.\n\
3) Each recommendation protocol must include dose, frequency, timing, and duration when possible.\n\
4) Use practical plain language. Example protocol format: '2000 IU once daily with breakfast for 8-12 weeks'.\n\
5) If evidence is insufficient for a precise protocol, say so and provide a conservative suggestion.\n\
6) Avoid dangerous/medical-prescription advice; keep supplement-level guidance only.\n\
7) Summary should explain what the labs suggest and mention if extraction appears partial.\n\
8) Do not invent lab values.\n\n\
OCR text (context, may be partial):\n{ocr}\n\n\
Extracted JSON:\n{existing}\n",
        existing = to_json(existing),
    )
}

/// Ordered, labelled image attachments for a batch.
///
/// Empty when the mode does not use images. Blank payloads are skipped
/// together with their label.
pub fn image_parts(request: &AnalysisRequest, batch: &PageBatch, mode: AnalysisMode) -> Vec<LabeledImage> {
    if !mode.uses_images() {
        return Vec::new();
    }
    batch
        .images
        .iter()
        .zip(&batch.labels)
        .filter_map(|(encoded, &label)| {
            let image = PageImage::from_base64(encoded)?;
            Some(LabeledImage {
                label: Some(image_label(request, label, batch.total_pages)),
                image,
            })
        })
        .collect()
}

/// `Image group N of T`, plus the raw pages a stitched image covers.
pub fn image_label(request: &AnalysisRequest, label: usize, total_pages: usize) -> String {
    let mut text = format!("Image group {label}{}", out_of(total_pages));
    if let Some(group) = request.stitched_group(label) {
        text.push_str(&format!(" (covers raw pages {group:?})"));
    }
    text
}

fn page_context(pages: &[usize], total_pages: usize) -> String {
    if pages.is_empty() {
        return String::new();
    }
    let total = if total_pages > 0 {
        format!("out of {total_pages}. ")
    } else {
        ". ".to_string()
    };
    format!(
        "Image pages are provided in ORDER. This request contains pages {pages:?} {total}\
Preserve page order and do not mix the beginning and the end of the report.\n"
    )
}

fn out_of(total_pages: usize) -> String {
    if total_pages > 0 {
        format!(" of {total_pages}")
    } else {
        String::new()
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
