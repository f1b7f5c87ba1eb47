//! CLI binary for lablens.
//!
//! A thin shim over the library crate that maps CLI flags (and the
//! backend's environment variables) to `AnalysisConfig`, runs one request
//! and prints the extraction result.

use anyhow::{Context, Result};
use clap::{Args, Parser};
use lablens::{
    analyze, AnalysisConfig, AnalysisMode, AnalysisProgressCallback, AnalysisRequest,
    ProgressCallback, Provider,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over page batches, with a log line per finished batch.
struct CliProgressCallback {
    bar: ProgressBar,
    batch_start: Mutex<Instant>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading request…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            batch_start: Mutex::new(Instant::now()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.batch_start
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, total_batches: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_batches as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Analyzing");
    }

    fn on_batch_start(&self, _batch: usize, _total: usize, pages: &[usize]) {
        if let Ok(mut t) = self.batch_start.lock() {
            *t = Instant::now();
        }
        self.bar.set_message(format!("pages {pages:?}"));
    }

    fn on_completeness_retry(&self, batch: usize, biomarkers: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}  only {} biomarkers, retrying image by image",
            yellow("↻"),
            batch,
            biomarkers
        ));
    }

    fn on_batch_complete(&self, batch: usize, total: usize, biomarkers: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {:<16}  {}",
            green("✓"),
            batch,
            total,
            dim(&format!("{biomarkers:>3} biomarkers")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}  {}",
            red("✗"),
            batch,
            total,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_synthesis(&self, applied: bool) {
        if !applied {
            self.bar
                .println(format!("  {} Summary/recommendation pass skipped or failed", yellow("⚠")));
        }
    }

    fn on_analysis_complete(&self, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!("{} Analysis complete", green("✔"));
        } else {
            eprintln!(
                "{} Analysis failed ({} batch error(s))",
                red("✘"),
                self.errors.load(Ordering::SeqCst)
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyze a request body, result JSON on stdout, trail on stderr
  lablens request.json

  # Read from stdin, pretty-print to a file
  cat request.json | lablens - --pretty -o result.json

  # Qwen (DashScope) with larger batches
  AI_PROVIDER=qwen QWEN_API_KEY=sk-... lablens request.json --batch-size 3

  # OCR text only, no images sent
  lablens request.json --ocr-only

  # Any edgequake-llm provider
  lablens request.json --provider openai --model gpt-4.1-mini,gpt-4.1

REQUEST JSON:
  {"images": ["<base64>", ...],             required, page order
   "reportText": "...",                      also report_text / ocrText / ocr_text
   "reportTextByPage": [{"page": 1, "text": "..."}],
   "stitchedPageGroups": [[1, 2], [3]],
   "profile": {"gender": "...", "ageBand": "...", "weightBand": "..."}}

ENVIRONMENT VARIABLES:
  AI_PROVIDER                 openrouter (default) | qwen | any edgequake-llm provider
  OPENROUTER_API_KEY          OpenRouter key
  OPENROUTER_PRIMARY_MODEL    plus OPENROUTER_FALLBACK_MODEL, _2, _3
  QWEN_API_KEY                Qwen key (DASHSCOPE_API_KEY also accepted)
  QWEN_PRIMARY_MODEL          plus QWEN_FALLBACK_MODEL, _2, _3
  AI_OCR_ONLY_MODE            true: send OCR text only
  AI_VISUAL_ONLY_MODE         true: send images only, skip reconciliation
  RUST_LOG                    tracing filter, overrides --verbose
"#;

/// Extract biomarkers from lab-report images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "lablens",
    version,
    about = "Extract biomarkers from lab-report images using Vision LLMs",
    long_about = "Extract structured biomarkers, recommendations and a summary from \
photographed lab reports. Pages are analyzed in ordered batches with model fallback, \
a completeness retry, a reconciliation pass and a final synthesis pass.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Request JSON file, or `-` for stdin.
    input: String,

    /// Write the result JSON to this file instead of stdout.
    #[arg(short, long, env = "LABLENS_OUTPUT")]
    output: Option<PathBuf>,

    /// Provider: openrouter, qwen, or any edgequake-llm provider name.
    #[arg(long, env = "AI_PROVIDER", default_value = "openrouter")]
    provider: String,

    #[command(flatten)]
    openrouter: OpenRouterArgs,

    #[command(flatten)]
    qwen: QwenArgs,

    /// Model chain for other providers, primary first (comma-separated).
    #[arg(long = "model", env = "LABLENS_MODELS", value_delimiter = ',')]
    models: Vec<String>,

    /// Max output tokens per call.
    #[arg(long, env = "OPENROUTER_MAX_TOKENS", default_value_t = 2400)]
    max_tokens: usize,

    /// Per-call timeout in seconds.
    #[arg(long, env = "OPENROUTER_TIMEOUT_SECONDS", default_value_t = 180)]
    timeout: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "LABLENS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Images per extraction call.
    #[arg(long, env = "OPENROUTER_PAGE_BATCH_SIZE", default_value_t = 2)]
    batch_size: usize,

    /// Biomarkers expected per image before a batch counts as incomplete.
    #[arg(long, env = "OPENROUTER_MIN_BIOMARKERS_PER_IMAGE_HINT", default_value_t = 2)]
    min_biomarkers_per_image: usize,

    /// Single-image retries issued concurrently.
    #[arg(long, env = "LABLENS_RETRY_CONCURRENCY", default_value_t = 1)]
    retry_concurrency: usize,

    /// Run the reconciliation pass on every batch.
    #[arg(long, env = "OPENROUTER_ENABLE_RECONCILIATION", default_value_t = true,
          action = clap::ArgAction::Set,
          value_parser = clap::builder::BoolishValueParser::new())]
    reconciliation: bool,

    /// Skip the final summary/recommendation pass.
    #[arg(long, env = "LABLENS_NO_SYNTHESIS")]
    no_synthesis: bool,

    /// Send OCR text only; no images, no batching.
    #[arg(long, env = "AI_OCR_ONLY_MODE", conflicts_with = "visual_only")]
    ocr_only: bool,

    /// Send images only; OCR text is ignored and reconciliation skipped.
    #[arg(long, env = "AI_VISUAL_ONLY_MODE")]
    visual_only: bool,

    /// Pretty-print the result JSON.
    #[arg(long)]
    pretty: bool,

    /// Write the full output (result, trail, stats) instead of the result only.
    #[arg(long)]
    full: bool,

    /// Disable progress bar.
    #[arg(long, env = "LABLENS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LABLENS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LABLENS_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct OpenRouterArgs {
    /// OpenRouter API key.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    openrouter_api_key: Option<String>,

    /// OpenRouter chat-completions URL.
    #[arg(long, env = "OPENROUTER_URL")]
    openrouter_url: Option<String>,

    #[arg(long, env = "OPENROUTER_PRIMARY_MODEL")]
    openrouter_primary_model: Option<String>,

    #[arg(long, env = "OPENROUTER_FALLBACK_MODEL")]
    openrouter_fallback_model: Option<String>,

    #[arg(long, env = "OPENROUTER_FALLBACK_MODEL_2")]
    openrouter_fallback_model_2: Option<String>,

    /// Text-capable last resort; reads the OCR text.
    #[arg(long, env = "OPENROUTER_FALLBACK_MODEL_3")]
    openrouter_fallback_model_3: Option<String>,

    /// Sent as X-Title.
    #[arg(long, env = "OPENROUTER_APP_NAME", default_value = "LabLens")]
    app_name: String,

    /// Sent as HTTP-Referer.
    #[arg(long, env = "OPENROUTER_APP_URL", default_value = "https://example.com")]
    app_url: String,
}

#[derive(Args, Debug)]
struct QwenArgs {
    /// Qwen / DashScope API key.
    #[arg(long, env = "QWEN_API_KEY", hide_env_values = true)]
    qwen_api_key: Option<String>,

    /// Qwen chat-completions URL.
    #[arg(long, env = "QWEN_URL")]
    qwen_url: Option<String>,

    #[arg(long, env = "QWEN_PRIMARY_MODEL")]
    qwen_primary_model: Option<String>,

    #[arg(long, env = "QWEN_FALLBACK_MODEL")]
    qwen_fallback_model: Option<String>,

    #[arg(long, env = "QWEN_FALLBACK_MODEL_2")]
    qwen_fallback_model_2: Option<String>,

    #[arg(long, env = "QWEN_FALLBACK_MODEL_3")]
    qwen_fallback_model_3: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-batch feedback, so INFO logs are
    // suppressed while it is active.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let request = read_input(&cli.input).await?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let output = analyze(&request, &config).await.context("Analysis failed")?;

    let json = if cli.full {
        to_json(&output, cli.pretty)?
    } else {
        to_json(&output.result, cli.pretty)?
    };
    match cli.output {
        Some(ref path) => write_atomic(path, &json).await?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")?;
        }
    }

    if !cli.quiet {
        eprintln!("{}", dim(&output.diagnostic));
        eprintln!(
            "{}  {} biomarkers  {} recommendations  {} batch(es)  {} calls ({} failed)  {}ms{}",
            green("✔"),
            bold(&output.result.biomarkers.len().to_string()),
            output.result.recommendations.len(),
            output.stats.batches,
            output.stats.model_calls,
            output.stats.failed_calls,
            output.stats.duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
    }

    Ok(())
}

async fn read_input(input: &str) -> Result<AnalysisRequest> {
    if input == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read request from stdin")?;
        return AnalysisRequest::from_slice(&buf).context("Invalid request");
    }
    lablens::pipeline::input::read_request(Path::new(input))
        .await
        .context("Invalid request")
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let provider: Provider = cli.provider.parse()?;
    let mode = if cli.ocr_only {
        AnalysisMode::OcrOnly
    } else if cli.visual_only {
        AnalysisMode::VisualOnly
    } else {
        AnalysisMode::Hybrid
    };

    let mut builder = AnalysisConfig::builder()
        .provider(provider.clone())
        .app_name(cli.openrouter.app_name.clone())
        .app_url(cli.openrouter.app_url.clone())
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.timeout)
        .temperature(cli.temperature)
        .batch_size(cli.batch_size)
        .min_biomarkers_per_image(cli.min_biomarkers_per_image)
        .retry_concurrency(cli.retry_concurrency)
        .reconciliation(cli.reconciliation)
        .synthesis(!cli.no_synthesis)
        .mode(mode);

    let (key, url, models) = match provider {
        Provider::OpenRouter => {
            let a = &cli.openrouter;
            (
                a.openrouter_api_key.clone(),
                a.openrouter_url.clone(),
                model_overrides(
                    &provider,
                    [
                        &a.openrouter_primary_model,
                        &a.openrouter_fallback_model,
                        &a.openrouter_fallback_model_2,
                        &a.openrouter_fallback_model_3,
                    ],
                ),
            )
        }
        Provider::Qwen => {
            let a = &cli.qwen;
            (
                a.qwen_api_key.clone(),
                a.qwen_url.clone(),
                model_overrides(
                    &provider,
                    [
                        &a.qwen_primary_model,
                        &a.qwen_fallback_model,
                        &a.qwen_fallback_model_2,
                        &a.qwen_fallback_model_3,
                    ],
                ),
            )
        }
        Provider::Native(_) => (None, None, Some(cli.models.clone())),
    };

    if let Some(key) = key {
        builder = builder.api_key(key);
    }
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
        builder = builder.endpoint(url);
    }
    if let Some(models) = models {
        builder = builder.models(models);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Provider defaults with per-position overrides; `None` when nothing is
/// overridden. An empty override removes that position from the chain.
fn model_overrides(provider: &Provider, overrides: [&Option<String>; 4]) -> Option<Vec<String>> {
    if overrides.iter().all(|o| o.is_none()) {
        return None;
    }
    let defaults = provider.default_models();
    Some(
        overrides
            .iter()
            .enumerate()
            .map(|(i, o)| match o {
                Some(m) => m.trim().to_string(),
                None => defaults.get(i).cloned().unwrap_or_default(),
            })
            .collect(),
    )
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    json.context("Failed to serialise output")
}

/// Write via temp file + rename so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
