//! Model backend seam.
//!
//! The orchestrator talks to models only through [`ModelBackend`]. The
//! production implementation, [`LlmBackend`], routes each request to an
//! `edgequake_llm` provider registered for the requested model name; tests
//! substitute scripted in-process backends.

use crate::error::BackendError;
use crate::pipeline::cost::ModelCatalog;
use crate::prompts::Prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: Prompt,
    pub temperature: f32,
    pub max_output_units: usize,
}

/// What a backend returns for one call.
///
/// Usage counts are optional; when absent the orchestrator estimates them
/// from the prompt and reply text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    pub text: String,
    pub input_units: Option<usize>,
    pub output_units: Option<usize>,
}

impl BackendReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A model-calling service.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<BackendReply, BackendError>;
}

/// [`ModelBackend`] over `edgequake_llm` providers, one per model name.
#[derive(Default, Clone)]
pub struct LlmBackend {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
}

impl std::fmt::Debug for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut models: Vec<&String> = self.providers.keys().collect();
        models.sort();
        f.debug_struct("LlmBackend").field("models", &models).finish()
    }
}

impl LlmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests for `model` to `provider`.
    pub fn register(mut self, model: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        self.providers.insert(model.into(), provider);
        self
    }

    /// Create a provider for every catalog model via
    /// [`ProviderFactory::create_llm_provider`].
    ///
    /// Models whose provider cannot be configured (typically a missing API
    /// key) are skipped with a warning; check [`LlmBackend::supports`] or
    /// prune the catalog to the models that remain.
    pub fn from_catalog(catalog: &ModelCatalog) -> Self {
        let mut backend = Self::new();
        for profile in catalog.models() {
            match ProviderFactory::create_llm_provider(&profile.provider, &profile.name) {
                Ok(provider) => {
                    debug!("Registered {} via provider '{}'", profile.name, profile.provider);
                    backend.providers.insert(profile.name.clone(), provider);
                }
                Err(e) => {
                    warn!(
                        "Skipping model '{}': provider '{}' not configured ({e})",
                        profile.name, profile.provider
                    );
                }
            }
        }
        backend
    }

    pub fn supports(&self, model: &str) -> bool {
        self.providers.contains_key(model)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl ModelBackend for LlmBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<BackendReply, BackendError> {
        let provider = self
            .providers
            .get(&request.model)
            .ok_or_else(|| BackendError::UnknownModel(request.model.clone()))?;

        let messages = vec![
            ChatMessage::system(request.prompt.system.as_str()),
            ChatMessage::user(request.prompt.user.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_output_units),
            ..Default::default()
        };

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        Ok(BackendReply {
            text: response.content,
            input_units: Some(response.prompt_tokens as usize),
            output_units: Some(response.completion_tokens as usize),
        })
    }
}

/// Map a provider error message onto the retry taxonomy.
fn classify_provider_error(detail: &str) -> BackendError {
    let lower = detail.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        BackendError::RateLimited {
            retry_after_secs: None,
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        BackendError::Timeout
    } else if lower.contains("context length")
        || lower.contains("maximum context")
        || lower.contains("not supported")
        || lower.contains("content policy")
    {
        BackendError::Capability(detail.to_string())
    } else {
        BackendError::Transient(detail.to_string())
    }
}
