//! Configuration types for lab-report analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built
//! via its [`AnalysisConfigBuilder`]. The config is immutable once built and
//! is handed to the [`crate::analyze::Analyzer`] at construction; nothing in
//! the pipeline reads process-wide state except the API-key fallback in
//! [`AnalysisConfig::resolve_api_key`].

use crate::error::AnalyzeError;
use crate::pipeline::completeness::{CompletenessPolicy, MinimumPerImage};
use crate::pipeline::llm::ModelCaller;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for an analysis run.
///
/// # Example
/// ```rust
/// use lablens::{AnalysisConfig, AnalysisMode, Provider};
///
/// let config = AnalysisConfig::builder()
///     .provider(Provider::Qwen)
///     .api_key("sk-test")
///     .batch_size(3)
///     .mode(AnalysisMode::Hybrid)
///     .build()
///     .unwrap();
/// assert_eq!(config.model_chain()[0], "qwen-vl-max-latest");
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Which hosted provider serves the models. Default: OpenRouter.
    pub provider: Provider,

    /// Bearer credential. When `None`, the provider's environment variable
    /// is consulted at analysis time.
    pub api_key: Option<String>,

    /// Chat-completions URL override. `None` uses the provider default.
    pub endpoint: Option<String>,

    /// Primary model followed by fallbacks, in priority order.
    /// `None` uses [`Provider::default_models`]. Blank entries are skipped
    /// when chains are derived but keep their position for the
    /// reconciliation ordering.
    pub models: Option<Vec<String>>,

    /// Sent as `X-Title` to OpenRouter. Default: "LabLens".
    pub app_name: String,

    /// Sent as `HTTP-Referer` to OpenRouter.
    pub app_url: String,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction is transcription; anything above ~0.2 starts producing
    /// plausible-looking values that are not on the page.
    pub temperature: f32,

    /// Maximum output tokens per call. Default: 2400.
    pub max_tokens: usize,

    /// Per-call timeout in seconds. Default: 180.
    ///
    /// Thinking-style VL models can take well over a minute on a two-page
    /// batch. A timeout counts as a model failure and advances the chain.
    pub api_timeout_secs: u64,

    /// Images per extraction call. Default: 2.
    pub batch_size: usize,

    /// Heuristic deciding when a multi-image batch is re-extracted one
    /// image at a time. Default: [`MinimumPerImage`] with a floor of 2.
    pub completeness: Arc<dyn CompletenessPolicy>,

    /// Run the reconciliation pass on every batch. Default: true.
    pub reconciliation: bool,

    /// Run the final summary / recommendation synthesis pass. Default: true.
    pub synthesis: bool,

    /// Which inputs the models see. Default: [`AnalysisMode::Hybrid`].
    pub mode: AnalysisMode,

    /// Single-image retries issued concurrently. Default: 1 (sequential).
    ///
    /// Results are merged in page order regardless, so raising this only
    /// changes wall-clock time.
    pub retry_concurrency: usize,

    /// Optional per-batch progress events.
    pub progress_callback: Option<ProgressCallback>,

    /// Pre-built model caller. Takes precedence over `provider`.
    pub caller: Option<Arc<dyn ModelCaller>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_key: None,
            endpoint: None,
            models: None,
            app_name: "LabLens".to_string(),
            app_url: "https://example.com".to_string(),
            temperature: 0.1,
            max_tokens: 2400,
            api_timeout_secs: 180,
            batch_size: 2,
            completeness: Arc::new(MinimumPerImage::default()),
            reconciliation: true,
            synthesis: true,
            mode: AnalysisMode::default(),
            retry_concurrency: 1,
            progress_callback: None,
            caller: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("models", &self.models)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("batch_size", &self.batch_size)
            .field("reconciliation", &self.reconciliation)
            .field("synthesis", &self.synthesis)
            .field("mode", &self.mode)
            .field("retry_concurrency", &self.retry_concurrency)
            .field("caller", &self.caller.as_ref().map(|_| "<dyn ModelCaller>"))
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    fn raw_models(&self) -> Vec<String> {
        self.models
            .clone()
            .unwrap_or_else(|| self.provider.default_models())
    }

    /// Extraction chain: non-blank models in priority order.
    ///
    /// In OCR-only mode text-capable models are tried first, since vision
    /// models gain nothing from a request without images.
    pub fn model_chain(&self) -> Vec<String> {
        let chain = clean_chain(self.raw_models());
        if self.mode != AnalysisMode::OcrOnly {
            return chain;
        }
        let (text_first, vision): (Vec<String>, Vec<String>) =
            chain.into_iter().partition(|m| is_text_model(m));
        text_first.into_iter().chain(vision).collect()
    }

    /// Reconciliation chain: fallback 1, fallback 2, then primary.
    ///
    /// Putting a different model first means the correction pass is not
    /// done by the model whose output is being corrected.
    pub fn reconciliation_chain(&self) -> Vec<String> {
        let raw = self.raw_models();
        let picks = [1usize, 2, 0]
            .iter()
            .filter_map(|&i| raw.get(i).cloned())
            .collect();
        clean_chain(picks)
    }

    /// Synthesis chain: the same models, in the same order, as extraction.
    pub fn synthesis_chain(&self) -> Vec<String> {
        self.model_chain()
    }

    /// Credential for the active provider: the configured key, else the
    /// provider's environment variables in order.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            return Some(key.to_string());
        }
        self.provider
            .api_key_env()
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    /// Chat-completions endpoint for the active provider.
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint
            .clone()
            .or_else(|| self.provider.default_endpoint().map(str::to_string))
    }
}

fn clean_chain(models: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(models.len());
    for m in models {
        let m = m.trim();
        if !m.is_empty() && !out.iter().any(|o| o == m) {
            out.push(m.to_string());
        }
    }
    out
}

fn is_text_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("gemma") || (!lower.contains("vl") && !lower.contains("vision"))
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    /// Primary model first, then fallbacks.
    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    pub fn app_url(mut self, url: impl Into<String>) -> Self {
        self.config.app_url = url.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    /// Use the default policy with a custom per-image floor.
    pub fn min_biomarkers_per_image(mut self, n: usize) -> Self {
        self.config.completeness = Arc::new(MinimumPerImage::new(n));
        self
    }

    pub fn completeness_policy(mut self, policy: Arc<dyn CompletenessPolicy>) -> Self {
        self.config.completeness = policy;
        self
    }

    pub fn reconciliation(mut self, enabled: bool) -> Self {
        self.config.reconciliation = enabled;
        self
    }

    pub fn synthesis(mut self, enabled: bool) -> Self {
        self.config.synthesis = enabled;
        self
    }

    pub fn mode(mut self, mode: AnalysisMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn retry_concurrency(mut self, n: usize) -> Self {
        self.config.retry_concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn caller(mut self, caller: Arc<dyn ModelCaller>) -> Self {
        self.config.caller = Some(caller);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalyzeError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(AnalyzeError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(AnalyzeError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(AnalyzeError::InvalidConfig("API timeout must be ≥ 1s".into()));
        }
        if c.model_chain().is_empty() {
            return Err(AnalyzeError::InvalidConfig(format!(
                "No models configured for provider '{}'",
                c.provider.label()
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Hosted model provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Provider {
    /// OpenRouter chat completions (default).
    #[default]
    OpenRouter,
    /// Alibaba DashScope, OpenAI-compatible mode.
    Qwen,
    /// Any provider known to `edgequake_llm::ProviderFactory`
    /// (`openai`, `anthropic`, `gemini`, `ollama`, …). Credentials are read
    /// by the factory from its own environment variables.
    Native(String),
}

impl Provider {
    /// Human label used in the diagnostic trail.
    pub fn label(&self) -> &str {
        match self {
            Provider::OpenRouter => "OpenRouter",
            Provider::Qwen => "Qwen",
            Provider::Native(name) => name,
        }
    }

    /// Environment variables consulted for the API key, in order.
    pub fn api_key_env(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenRouter => &["OPENROUTER_API_KEY"],
            Provider::Qwen => &["QWEN_API_KEY", "DASHSCOPE_API_KEY"],
            Provider::Native(_) => &[],
        }
    }

    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Provider::OpenRouter => Some("https://openrouter.ai/api/v1/chat/completions"),
            Provider::Qwen => {
                Some("https://dashscope-intl.aliyuncs.com/compatible-mode/v1/chat/completions")
            }
            Provider::Native(_) => None,
        }
    }

    /// Primary model followed by fallbacks.
    pub fn default_models(&self) -> Vec<String> {
        let models: &[&str] = match self {
            Provider::OpenRouter => &[
                "nvidia/nemotron-nano-12b-v2-vl:free",
                "qwen/qwen3-vl-30b-a3b-thinking",
                "qwen/qwen3-vl-235b-a22b-thinking",
                // Text model: reads the OCR text when every vision model fails.
                "google/gemma-3-27b-it:free",
            ],
            Provider::Qwen => &[
                "qwen-vl-max-latest",
                "qwen-vl-plus-latest",
                "qwen2.5-vl-72b-instruct",
            ],
            Provider::Native(_) => &[],
        };
        models.iter().map(|m| m.to_string()).collect()
    }
}

impl FromStr for Provider {
    type Err = std::convert::Infallible;

    /// `openrouter` and `qwen` (also `dashscope`) map to the built-in
    /// providers; any other name is handed to the provider factory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Ok(match lower.as_str() {
            "" | "openrouter" => Provider::OpenRouter,
            "qwen" | "dashscope" => Provider::Qwen,
            _ => Provider::Native(lower),
        })
    }
}

/// Which inputs the models are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisMode {
    /// OCR text is the primary source; images validate layout (default).
    #[default]
    Hybrid,
    /// Only OCR text is sent; no images are attached and no batching occurs.
    OcrOnly,
    /// Only images are sent; OCR text is ignored and reconciliation is skipped.
    VisualOnly,
}

impl AnalysisMode {
    pub fn uses_images(self) -> bool {
        self != AnalysisMode::OcrOnly
    }

    pub fn uses_ocr(self) -> bool {
        self != AnalysisMode::VisualOnly
    }

    pub fn label(self) -> &'static str {
        match self {
            AnalysisMode::Hybrid => "hybrid",
            AnalysisMode::OcrOnly => "ocr-only",
            AnalysisMode::VisualOnly => "visual-only",
        }
    }
}
