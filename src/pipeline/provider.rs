//! [`ModelCaller`] backed by `edgequake_llm`'s provider factory.
//!
//! Used for [`crate::config::Provider::Native`] names such as `openai`,
//! `anthropic`, `gemini` or `ollama`. Credentials come from whatever
//! environment variables the factory reads for that provider.

use crate::error::{AnalyzeError, ModelCallError};
use crate::pipeline::llm::{CallOptions, ModelCaller, ModelRequest, SYSTEM_INSTRUCTION};
use crate::pipeline::postprocess::parse_json_object;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

pub struct ProviderFactoryCaller {
    provider_name: String,
    options: CallOptions,
    // One factory provider per model id; creation reads env vars, so cache it.
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl ProviderFactoryCaller {
    /// Fails fast when the factory cannot build the provider for
    /// `first_model` (usually a missing API key).
    pub fn new(
        provider_name: impl Into<String>,
        first_model: &str,
        options: CallOptions,
    ) -> Result<Self, AnalyzeError> {
        let caller = ProviderFactoryCaller {
            provider_name: provider_name.into(),
            options,
            providers: Mutex::new(HashMap::new()),
        };
        caller
            .provider_for(first_model)
            .map_err(|e| AnalyzeError::ProviderNotConfigured {
                provider: caller.provider_name.clone(),
                hint: e.to_string(),
            })?;
        Ok(caller)
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, ModelCallError> {
        let mut cache = self
            .providers
            .lock()
            .map_err(|_| ModelCallError::network("provider cache poisoned"))?;
        if let Some(p) = cache.get(model) {
            return Ok(Arc::clone(p));
        }
        let provider = ProviderFactory::create_llm_provider(&self.provider_name, model)
            .map_err(|e| ModelCallError::network(e.to_string()))?;
        cache.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }
}

/// Flatten a request into factory chat messages.
///
/// The factory's user turn carries a single text block, so image labels
/// are listed after the prompt in attachment order.
pub fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    let mut text = request.prompt.clone();
    for label in request.images.iter().filter_map(|i| i.label.as_deref()) {
        text.push('\n');
        text.push_str(label);
    }
    let images = request
        .images
        .iter()
        .map(|i| ImageData::new(i.image.data.clone(), i.image.mime_type.clone()).with_detail("high"))
        .collect();
    vec![
        ChatMessage::system(SYSTEM_INSTRUCTION),
        ChatMessage::user_with_images(text.as_str(), images),
    ]
}

#[async_trait]
impl ModelCaller for ProviderFactoryCaller {
    async fn call(&self, model: &str, request: &ModelRequest) -> Result<Value, ModelCallError> {
        let provider = self.provider_for(model)?;
        let messages = build_messages(request);
        let options = self.completion_options();
        let start = Instant::now();

        let response = tokio::time::timeout(self.options.timeout, provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| ModelCallError::Timeout {
                secs: self.options.timeout.as_secs(),
            })?
            .map_err(|e| ModelCallError::network(e.to_string()))?;

        debug!(
            "{}/{}: {} input tokens, {} output tokens, {:?}",
            self.provider_name,
            model,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        parse_json_object(&response.content)
    }
}
