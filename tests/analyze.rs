//! Orchestration tests against a scripted model caller.
//!
//! No network: every model call is answered by a closure that sees the
//! stage (extraction / reconciliation / synthesis), the model name and the
//! page labels of the request.

use async_trait::async_trait;
use lablens::pipeline::llm::{CallOptions, OpenAiCompatibleCaller};
use lablens::{
    analyze, analyze_with_trail, AnalysisConfig, AnalysisConfigBuilder, AnalysisMode,
    AnalysisProgressCallback, AnalysisRequest, AnalyzeError, ModelCallError, ModelCaller,
    ModelRequest, NeverRetry, PageText,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ── Scripted caller ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Extraction,
    Reconciliation,
    Synthesis,
}

#[derive(Debug, Clone)]
struct Call {
    stage: Stage,
    model: String,
    pages: Vec<usize>,
    images: usize,
    prompt: String,
}

type Handler = dyn Fn(&Call) -> Result<Value, ModelCallError> + Send + Sync;

struct ScriptedCaller {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedCaller {
    fn new(
        handler: impl Fn(&Call) -> Result<Value, ModelCallError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedCaller {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self, stage: Stage) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .cloned()
            .collect()
    }

    fn models(&self, stage: Stage) -> Vec<String> {
        self.calls(stage).into_iter().map(|c| c.model).collect()
    }
}

#[async_trait]
impl ModelCaller for ScriptedCaller {
    async fn call(&self, model: &str, request: &ModelRequest) -> Result<Value, ModelCallError> {
        let call = Call {
            stage: stage_of(&request.prompt),
            model: model.to_string(),
            pages: pages_of(&request.prompt),
            images: request.images.len(),
            prompt: request.prompt.clone(),
        };
        self.calls.lock().unwrap().push(call.clone());
        (self.handler)(&call)
    }
}

fn stage_of(prompt: &str) -> Stage {
    if prompt.contains("reconciliation assistant") {
        Stage::Reconciliation
    } else if prompt.contains("functional-health assistant") {
        Stage::Synthesis
    } else {
        Stage::Extraction
    }
}

/// Page labels named in the prompt's page context, if any.
fn pages_of(prompt: &str) -> Vec<usize> {
    let start = ["contains pages [", "(ordered): ["]
        .iter()
        .find_map(|marker| prompt.find(marker).map(|i| i + marker.len()));
    let Some(start) = start else {
        return Vec::new();
    };
    let end = start + prompt[start..].find(']').unwrap();
    prompt[start..end]
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn result(markers: &[&str], summary: &str) -> Value {
    let biomarkers: Vec<Value> = markers
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "value": "1.0",
                "status": "Optimal",
                "explanation": format!("{name} in range"),
            })
        })
        .collect();
    json!({
        "biomarkers": biomarkers,
        "recommendations": [],
        "summary": summary,
        "disclaimer": "Not medical advice.",
    })
}

/// Two biomarkers per page so the completeness floor is met.
fn per_page(pages: &[usize]) -> Value {
    let names: Vec<String> = pages
        .iter()
        .flat_map(|p| [format!("P{p}a"), format!("P{p}b")])
        .collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    result(&refs, &format!("pages {pages:?}"))
}

fn unavailable() -> ModelCallError {
    ModelCallError::http(503, "provider overloaded")
}

fn request(images: usize) -> AnalysisRequest {
    AnalysisRequest {
        images: (0..images).map(|i| format!("IMG{i}AAAA")).collect(),
        report_text: "Ferritin 40 ng/mL\nTSH 2.1 mIU/L".into(),
        ..Default::default()
    }
}

fn builder(caller: &Arc<ScriptedCaller>) -> AnalysisConfigBuilder {
    AnalysisConfig::builder()
        .models(["A", "B", "C"])
        .caller(caller.clone() as Arc<dyn ModelCaller>)
        .reconciliation(false)
        .synthesis(false)
}

fn names(output: &lablens::AnalysisOutput) -> Vec<String> {
    output.result.biomarkers.iter().map(|b| b.name.clone()).collect()
}

// ── Fallback chain ───────────────────────────────────────────────────────

#[tokio::test]
async fn extraction_falls_back_in_chain_order() {
    let caller = ScriptedCaller::new(|call| match call.model.as_str() {
        "A" => Err(unavailable()),
        "B" => Ok(result(&["Ferritin"], "full")),
        _ => Ok(result(&["Never"], "never")),
    });
    let config = builder(&caller).build().unwrap();

    let output = analyze(&request(1), &config).await.unwrap();

    assert_eq!(caller.models(Stage::Extraction), vec!["A", "B"]);
    assert_eq!(names(&output), vec!["Ferritin"]);
    assert!(
        output.diagnostic.starts_with("OpenRouter success via B (after A: HTTP 503"),
        "{}",
        output.diagnostic
    );
    assert_eq!(output.stats.model_calls, 2);
    assert_eq!(output.stats.failed_calls, 1);
}

#[tokio::test]
async fn schema_invalid_output_moves_to_next_model() {
    let caller = ScriptedCaller::new(|call| match call.model.as_str() {
        "A" => Ok(json!({"biomarkers": "not a list", "recommendations": [], "summary": ""})),
        _ => Ok(result(&["TSH"], "ok")),
    });
    let config = builder(&caller).build().unwrap();

    let output = analyze(&request(1), &config).await.unwrap();

    assert_eq!(caller.models(Stage::Extraction), vec!["A", "B"]);
    assert_eq!(names(&output), vec!["TSH"]);
}

#[tokio::test]
async fn exhausted_chain_fails_single_pass_request() {
    let caller = ScriptedCaller::new(|_| Err(unavailable()));
    let config = builder(&caller).build().unwrap();

    let err = analyze(&request(2), &config).await.unwrap_err();

    assert!(matches!(err, AnalyzeError::ExtractionFailed { .. }));
    let trail = err.to_string();
    assert!(trail.starts_with("OpenRouter failed. A: HTTP 503"), "{trail}");
    assert!(trail.contains(" | B: HTTP 503"));
    assert!(trail.contains(" | C: HTTP 503"));
}

// ── Batching ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn five_images_run_as_three_ordered_batches() {
    let caller = ScriptedCaller::new(|call| Ok(per_page(&call.pages)));
    let config = builder(&caller).batch_size(2).build().unwrap();

    let output = analyze(&request(5), &config).await.unwrap();

    let batches: Vec<Vec<usize>> = caller
        .calls(Stage::Extraction)
        .into_iter()
        .map(|c| c.pages)
        .collect();
    assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    assert_eq!(
        names(&output),
        vec!["P1a", "P1b", "P2a", "P2b", "P3a", "P3b", "P4a", "P4b", "P5a", "P5b"]
    );
    assert!(output
        .result
        .summary
        .starts_with("Analyzed report pages in order across 3 batch(es)."));
    assert!(output.result.summary.ends_with("pages [5]"));
    assert_eq!(
        output.diagnostic,
        "OpenRouter batch success (ordered pages) via A -> A -> A"
    );
    assert_eq!(output.stats.batches, 3);
}

#[tokio::test]
async fn rows_repeated_across_batches_are_merged_once() {
    let caller = ScriptedCaller::new(|call| {
        let first = format!("Row{}", call.pages[0]);
        Ok(result(&[first.as_str(), "Shared", "Other"], "batch"))
    });
    let config = builder(&caller)
        .batch_size(2)
        .completeness_policy(Arc::new(NeverRetry))
        .build()
        .unwrap();

    let output = analyze(&request(4), &config).await.unwrap();

    assert_eq!(names(&output), vec!["Row1", "Shared", "Other", "Row3"]);
}

#[tokio::test]
async fn failing_batch_fails_the_whole_request() {
    let caller = ScriptedCaller::new(|call| {
        if call.pages == vec![3, 4] {
            Err(unavailable())
        } else {
            Ok(per_page(&call.pages))
        }
    });
    let config = builder(&caller).batch_size(2).build().unwrap();

    let (result, trail) = analyze_with_trail(&request(5), &config).await;

    assert!(result.is_none());
    assert!(
        trail.starts_with("OpenRouter batch mode failed. pages [3, 4]: A: HTTP 503"),
        "{trail}"
    );
    assert!(
        caller.calls(Stage::Extraction).iter().all(|c| c.pages != vec![5]),
        "batches after the failing one must not run"
    );
}

// ── Completeness retry ───────────────────────────────────────────────────

#[tokio::test]
async fn sparse_batch_is_retried_one_image_at_a_time() {
    let caller = ScriptedCaller::new(|call| {
        if call.images >= 2 {
            Ok(result(&["X", "Y", "Z"], "sparse"))
        } else {
            Ok(per_page(&call.pages))
        }
    });
    let config = builder(&caller).build().unwrap();

    let output = analyze(&request(2), &config).await.unwrap();

    let singles: Vec<Vec<usize>> = caller
        .calls(Stage::Extraction)
        .into_iter()
        .skip(1)
        .map(|c| c.pages)
        .collect();
    assert_eq!(singles, vec![vec![1], vec![2]]);
    assert_eq!(names(&output), vec!["P1a", "P1b", "P2a", "P2b"]);
    assert_eq!(output.stats.completeness_retries, 1);
    assert_eq!(
        output.diagnostic,
        "OpenRouter success via A (completeness-retry via A -> A)"
    );
}

#[tokio::test]
async fn complete_batch_is_not_retried() {
    let caller = ScriptedCaller::new(|call| Ok(per_page(&call.pages)));
    let config = builder(&caller).build().unwrap();

    let output = analyze(&request(2), &config).await.unwrap();

    assert_eq!(caller.calls(Stage::Extraction).len(), 1);
    assert_eq!(output.stats.completeness_retries, 0);
}

#[tokio::test]
async fn failed_single_image_retry_keeps_batch_result_and_still_reconciles() {
    let caller = ScriptedCaller::new(|call| match (call.stage, call.images) {
        (Stage::Reconciliation, _) => Ok(result(&["Reconciled"], "checked")),
        (_, 2) => Ok(result(&["Only"], "sparse")),
        _ if call.pages == vec![2] => Err(unavailable()),
        _ => Ok(per_page(&call.pages)),
    });
    let config = builder(&caller).reconciliation(true).build().unwrap();

    let output = analyze(&request(2), &config).await.unwrap();

    assert_eq!(output.stats.completeness_retries, 1);
    assert!(!output.diagnostic.contains("completeness-retry"));
    let reconciliations = caller.calls(Stage::Reconciliation);
    assert_eq!(reconciliations.len(), 1);
    assert_eq!(reconciliations[0].pages, vec![1, 2]);
    assert!(reconciliations[0].prompt.contains("\"Only\""));
    assert_eq!(names(&output), vec!["Reconciled"]);
}

// ── Reconciliation ───────────────────────────────────────────────────────

#[tokio::test]
async fn reconciliation_prefers_fallback_models() {
    let caller = ScriptedCaller::new(|call| match call.stage {
        Stage::Reconciliation if call.model == "B" => Err(unavailable()),
        Stage::Reconciliation => Ok(result(&["Ferritin", "TSH"], "reconciled")),
        _ => Ok(result(&["Ferritin"], "extracted")),
    });
    let config = builder(&caller).reconciliation(true).build().unwrap();

    let output = analyze(&request(1), &config).await.unwrap();

    assert_eq!(caller.models(Stage::Reconciliation), vec!["B", "C"]);
    assert_eq!(names(&output), vec!["Ferritin", "TSH"]);
    assert_eq!(output.stats.reconciled_batches, 1);
}

#[tokio::test]
async fn reconciliation_failure_is_not_fatal() {
    let caller = ScriptedCaller::new(|call| match call.stage {
        Stage::Reconciliation => Err(unavailable()),
        _ => Ok(result(&["Ferritin"], "extracted")),
    });
    let config = builder(&caller).reconciliation(true).build().unwrap();

    let output = analyze(&request(1), &config).await.unwrap();

    assert_eq!(caller.models(Stage::Reconciliation), vec!["B", "C", "A"]);
    assert_eq!(names(&output), vec!["Ferritin"]);
    assert_eq!(output.result.summary, "extracted");
    assert!(
        output
            .diagnostic
            .starts_with("OpenRouter success via A | reconciliation:B: HTTP 503"),
        "{}",
        output.diagnostic
    );
    assert_eq!(output.stats.reconciled_batches, 0);
}

// ── Modes ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn visual_only_ignores_ocr_and_skips_reconciliation() {
    let caller = ScriptedCaller::new(|call| Ok(per_page(&call.pages)));
    let config = builder(&caller)
        .mode(AnalysisMode::VisualOnly)
        .reconciliation(true)
        .build()
        .unwrap();

    analyze(&request(1), &config).await.unwrap();

    assert!(caller.calls(Stage::Reconciliation).is_empty());
    let extraction = &caller.calls(Stage::Extraction)[0];
    assert!(extraction.prompt.contains("Report text (OCR): [OCR disabled or unavailable]"));
    assert!(!extraction.prompt.contains("Ferritin 40"));
    assert_eq!(extraction.images, 1);
}

#[tokio::test]
async fn ocr_only_without_text_makes_no_calls() {
    let caller = ScriptedCaller::new(|_| Ok(result(&["X"], "x")));
    let config = builder(&caller).mode(AnalysisMode::OcrOnly).build().unwrap();
    let mut req = request(3);
    req.report_text.clear();

    let err = analyze(&req, &config).await.unwrap_err();

    assert!(matches!(err, AnalyzeError::MissingOcrText { .. }));
    assert_eq!(
        err.to_string(),
        "OpenRouter OCR-only mode enabled but no OCR text was provided"
    );
    assert!(caller.calls(Stage::Extraction).is_empty());
}

#[tokio::test]
async fn ocr_only_sparse_batch_retries_with_per_page_text() {
    let caller = ScriptedCaller::new(|call| {
        if call.pages.len() >= 2 {
            Ok(result(&["Ferritin"], "sparse"))
        } else {
            Ok(per_page(&call.pages))
        }
    });
    let config = builder(&caller)
        .mode(AnalysisMode::OcrOnly)
        .batch_size(2)
        .build()
        .unwrap();
    let mut req = request(2);
    req.report_text_by_page = vec![
        PageText { page: 1, text: "Ferritin 40 ng/mL".into() },
        PageText { page: 2, text: "TSH 2.1 mIU/L".into() },
    ];

    let output = analyze(&req, &config).await.unwrap();

    let calls = caller.calls(Stage::Extraction);
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.images == 0));
    assert_eq!(calls[1].pages, vec![1]);
    assert!(calls[1].prompt.contains("[Page 1]\nFerritin 40 ng/mL"));
    assert!(!calls[1].prompt.contains("[Page 2]"));
    assert_eq!(calls[2].pages, vec![2]);
    assert!(calls[2].prompt.contains("[Page 2]\nTSH 2.1 mIU/L"));
    assert!(!calls[2].prompt.contains("[Page 1]"));
    assert_eq!(output.stats.batches, 1);
    assert_eq!(output.stats.completeness_retries, 1);
    assert_eq!(names(&output), vec!["P1a", "P1b", "P2a", "P2b"]);
}

#[tokio::test]
async fn blank_payloads_count_towards_the_completeness_floor() {
    let caller = ScriptedCaller::new(|call| {
        if call.pages.len() >= 2 {
            Ok(result(&["Only"], "sparse"))
        } else {
            Ok(per_page(&call.pages))
        }
    });
    let config = builder(&caller).build().unwrap();
    let mut req = request(2);
    req.images[1] = "   ".into();

    let output = analyze(&req, &config).await.unwrap();

    let calls = caller.calls(Stage::Extraction);
    assert_eq!(calls[0].images, 1);
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].images, 0);
    assert_eq!(output.stats.completeness_retries, 1);
}

#[tokio::test]
async fn ocr_only_complete_request_is_a_single_text_call() {
    let rows = [
        "Ferritin", "TSH", "Hemoglobin", "WBC", "Platelets", "LDL", "HDL", "A1c", "Iron", "B12",
    ];
    let caller = ScriptedCaller::new(move |_| Ok(result(&rows, "from text")));
    let config = builder(&caller)
        .mode(AnalysisMode::OcrOnly)
        .batch_size(2)
        .build()
        .unwrap();

    let output = analyze(&request(5), &config).await.unwrap();

    let calls = caller.calls(Stage::Extraction);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].images, 0);
    assert!(calls[0].prompt.contains("Ferritin 40 ng/mL"));
    assert_eq!(output.stats.batches, 1);
}

#[tokio::test]
async fn empty_image_list_is_rejected() {
    let caller = ScriptedCaller::new(|_| Ok(result(&["X"], "x")));
    let config = builder(&caller).build().unwrap();

    let err = analyze(&request(0), &config).await.unwrap_err();

    assert!(matches!(err, AnalyzeError::InvalidRequest(_)));
}

// ── Synthesis ────────────────────────────────────────────────────────────

#[tokio::test]
async fn synthesis_replaces_only_summary_and_recommendations() {
    let caller = ScriptedCaller::new(|call| match call.stage {
        Stage::Synthesis => Ok(json!({
            "biomarkers": [{"name": "Invented", "value": "9", "status": "High", "explanation": "x"}],
            "recommendations": [{
                "name": "Iron",
                "protocol": "18 mg daily with vitamin C for 8 weeks",
                "reason": "Low-normal ferritin"
            }],
            "summary": "Overall healthy panel.",
            "disclaimer": "Consult your physician.",
        })),
        _ => Ok(per_page(&call.pages)),
    });
    let config = builder(&caller).batch_size(1).synthesis(true).build().unwrap();

    let output = analyze(&request(2), &config).await.unwrap();

    assert_eq!(names(&output), vec!["P1a", "P1b", "P2a", "P2b"]);
    assert_eq!(output.result.recommendations.len(), 1);
    assert_eq!(output.result.recommendations[0].name, "Iron");
    assert_eq!(output.result.summary, "Overall healthy panel.");
    assert_eq!(output.result.disclaimer, "Consult your physician.");
    assert!(output.stats.synthesized);

    let synthesis = caller.calls(Stage::Synthesis);
    assert_eq!(synthesis.len(), 1);
    assert_eq!(synthesis[0].images, 0);
    assert!(synthesis[0].prompt.contains("P2b"));
}

#[tokio::test]
async fn synthesis_failure_keeps_merged_result() {
    let caller = ScriptedCaller::new(|call| match call.stage {
        Stage::Synthesis => Err(unavailable()),
        _ => Ok(per_page(&call.pages)),
    });
    let config = builder(&caller).batch_size(1).synthesis(true).build().unwrap();

    let output = analyze(&request(2), &config).await.unwrap();

    assert_eq!(names(&output), vec!["P1a", "P1b", "P2a", "P2b"]);
    assert!(output
        .result
        .summary
        .starts_with("Analyzed report pages in order across 2 batch(es)."));
    assert!(output.diagnostic.contains(" | summary/reco:A: HTTP 503"));
    assert!(!output.stats.synthesized);
}

// ── Progress ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl AnalysisProgressCallback for Recorder {
    fn on_analysis_start(&self, total_batches: usize) {
        self.push(format!("start {total_batches}"));
    }
    fn on_batch_start(&self, batch: usize, _total: usize, pages: &[usize]) {
        self.push(format!("batch {batch} {pages:?}"));
    }
    fn on_completeness_retry(&self, batch: usize, biomarkers: usize) {
        self.push(format!("retry {batch} {biomarkers}"));
    }
    fn on_batch_complete(&self, batch: usize, _total: usize, biomarkers: usize) {
        self.push(format!("done {batch} {biomarkers}"));
    }
    fn on_batch_error(&self, batch: usize, _total: usize, _error: &str) {
        self.push(format!("error {batch}"));
    }
    fn on_synthesis(&self, applied: bool) {
        self.push(format!("synthesis {applied}"));
    }
    fn on_analysis_complete(&self, success: bool) {
        self.push(format!("complete {success}"));
    }
}

#[tokio::test]
async fn progress_events_follow_batches() {
    let caller = ScriptedCaller::new(|call| {
        if call.pages == vec![3, 4] {
            Ok(result(&["Lonely"], "sparse"))
        } else {
            Ok(per_page(&call.pages))
        }
    });
    let recorder = Arc::new(Recorder::default());
    let config = builder(&caller)
        .batch_size(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    analyze(&request(5), &config).await.unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start 3",
            "batch 1 [1, 2]",
            "done 1 4",
            "batch 2 [3, 4]",
            "retry 2 1",
            "done 2 4",
            "batch 3 [5]",
            "done 3 2",
            "synthesis false",
            "complete true",
        ]
    );
}

#[tokio::test]
async fn progress_reports_failed_batch() {
    let caller = ScriptedCaller::new(|_| Err(unavailable()));
    let recorder = Arc::new(Recorder::default());
    let config = builder(&caller)
        .batch_size(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    assert!(analyze(&request(3), &config).await.is_err());

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["start 2", "batch 1 [1, 2]", "error 1", "complete false"]
    );
}

// ── HTTP caller ──────────────────────────────────────────────────────────

/// Serve one HTTP response on a local port; yields the raw request.
async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= split + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });
    (url, handle)
}

fn options() -> CallOptions {
    CallOptions {
        temperature: 0.1,
        max_tokens: 2400,
        timeout: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn http_caller_parses_fenced_message_content() {
    let content = format!("```json\n{}\n```", result(&["Ferritin"], "ok"));
    let body = json!({"choices": [{"message": {"role": "assistant", "content": content}}]});
    let (url, server) = serve_once("200 OK", body.to_string()).await;

    let caller = OpenAiCompatibleCaller::new(url, "sk-local", options())
        .unwrap()
        .with_header("X-Title", "LabLens");
    let value = caller
        .call("vision-model", &ModelRequest::text_only("extract"))
        .await
        .unwrap();

    assert_eq!(value["biomarkers"][0]["name"], "Ferritin");
    let raw = server.await.unwrap().to_lowercase();
    assert!(raw.contains("authorization: bearer sk-local"));
    assert!(raw.contains("x-title: lablens"));
    assert!(raw.contains("\"model\":\"vision-model\""));
}

#[tokio::test]
async fn http_caller_maps_error_status() {
    let (url, server) = serve_once("429 Too Many Requests", r#"{"error":"rate limited"}"#.into()).await;

    let caller = OpenAiCompatibleCaller::new(url, "sk-local", options()).unwrap();
    let err = caller
        .call("vision-model", &ModelRequest::text_only("extract"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModelCallError::Transport {
            status: Some(429),
            ..
        }
    ));
    assert!(err.to_string().contains("rate limited"));
    server.await.unwrap();
}
