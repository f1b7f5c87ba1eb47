//! VLM interaction: one request to one model through one provider endpoint.
//!
//! This module owns the wire format and nothing else. All prompt
//! engineering lives in [`crate::prompts`], and model fallback lives in
//! [`crate::pipeline::chain`]; a caller never retries.
//!
//! ## Message Layout
//!
//! 1. **System message** — [`SYSTEM_INSTRUCTION`], restricting output to JSON
//! 2. **User message** — the prompt text, then for every attached image an
//!    optional label text part followed by the `image_url` part
//!
//! Labels travel next to their image so the model can tell "Image group 3
//! of 5" from "Image group 4 of 5" without relying on attachment order.

use crate::config::AnalysisConfig;
use crate::error::{AnalyzeError, ModelCallError};
use crate::pipeline::encode::PageImage;
use crate::pipeline::postprocess::parse_message_content;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// System instruction sent with every request.
pub const SYSTEM_INSTRUCTION: &str = "Return strictly valid JSON only.";

/// An image plus the text part that introduces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub label: Option<String>,
    pub image: PageImage,
}

/// Everything a single model call needs besides the model id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRequest {
    pub prompt: String,
    pub images: Vec<LabeledImage>,
}

impl ModelRequest {
    pub fn text_only(prompt: impl Into<String>) -> Self {
        ModelRequest {
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }

    /// User-turn content parts in OpenAI chat format.
    pub fn user_content(&self) -> Vec<Value> {
        let mut parts = Vec::with_capacity(1 + self.images.len() * 2);
        parts.push(json!({"type": "text", "text": self.prompt}));
        for item in &self.images {
            if let Some(ref label) = item.label {
                parts.push(json!({"type": "text", "text": label}));
            }
            parts.push(json!({
                "type": "image_url",
                "image_url": {"url": item.image.to_data_url()},
            }));
        }
        parts
    }
}

/// Issues one request to one named model.
///
/// Implementations return the parsed JSON **object** from the model's
/// message content, or a typed failure. They must not retry; the fallback
/// chain decides what happens next.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, model: &str, request: &ModelRequest) -> Result<Value, ModelCallError>;
}

/// Sampling and budget settings shared by every call of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl CallOptions {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        CallOptions {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

/// Caller for OpenAI-compatible chat-completions endpoints (OpenRouter,
/// DashScope compatible mode, vLLM, …).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleCaller {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    headers: Vec<(String, String)>,
    options: CallOptions,
}

impl OpenAiCompatibleCaller {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        options: CallOptions,
    ) -> Result<Self, AnalyzeError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| AnalyzeError::Internal(format!("HTTP client: {e}")))?;
        Ok(OpenAiCompatibleCaller {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            headers: Vec::new(),
            options,
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Request body for one call.
    pub fn build_body(&self, model: &str, request: &ModelRequest) -> Value {
        json!({
            "model": model,
            "messages": [
                {"role": "system", "content": SYSTEM_INSTRUCTION},
                {"role": "user", "content": request.user_content()},
            ],
            "temperature": self.options.temperature,
            "max_tokens": self.options.max_tokens,
        })
    }
}

#[async_trait]
impl ModelCaller for OpenAiCompatibleCaller {
    async fn call(&self, model: &str, request: &ModelRequest) -> Result<Value, ModelCallError> {
        let start = Instant::now();
        let body = self.build_body(model, request);

        let mut req = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let response = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(
            "{}: HTTP {} in {:?} ({} bytes, {} images)",
            model,
            status.as_u16(),
            start.elapsed(),
            text.len(),
            request.images.len()
        );

        if !status.is_success() {
            return Err(ModelCallError::http(status.as_u16(), &text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| ModelCallError::Format(format!("Provider response is not JSON: {e}")))?;
        extract_message_content(&parsed)
    }
}

impl OpenAiCompatibleCaller {
    fn transport_error(&self, e: reqwest::Error) -> ModelCallError {
        if e.is_timeout() {
            ModelCallError::Timeout {
                secs: self.options.timeout.as_secs(),
            }
        } else {
            ModelCallError::network(e.to_string())
        }
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response
/// and parse it.
pub fn extract_message_content(response: &Value) -> Result<Value, ModelCallError> {
    let choice = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| ModelCallError::Format("Provider response has no choices".into()))?;
    let message = choice
        .get("message")
        .filter(|m| m.is_object())
        .ok_or_else(|| ModelCallError::Format("Provider response missing message".into()))?;
    parse_message_content(message.get("content").unwrap_or(&Value::Null))
}
