//! The vision extraction capability, and its edgequake-llm implementation.
//!
//! The pipeline treats the model as an untrusted black box: it sends one
//! page image plus an instruction and gets text back. Everything behind that
//! seam lives in [`StructuredExtractionService`] so the orchestrator can be
//! driven by a scripted fake in tests or by a different backend in
//! production without changes.

use crate::config::ExtractionConfig;
use crate::error::{Pdf2TableError, ServiceError};
use crate::pipeline::encode;
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

/// One call to a vision-capable structured-extraction service.
///
/// Implementations return the model's raw text. They must not retry; retry
/// policy belongs to the orchestrator.
#[async_trait]
pub trait StructuredExtractionService: Send + Sync {
    async fn run_structured_extraction(
        &self,
        image: &PageImage,
        prompt: &str,
    ) -> Result<String, ServiceError>;
}

/// [`StructuredExtractionService`] backed by any edgequake-llm provider.
pub struct VisionLlmService {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl VisionLlmService {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }

    /// Resolve a provider from the config (see [`resolve_provider`]).
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, Pdf2TableError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config.temperature, config.max_tokens))
    }
}

#[async_trait]
impl StructuredExtractionService for VisionLlmService {
    async fn run_structured_extraction(
        &self,
        image: &PageImage,
        prompt: &str,
    ) -> Result<String, ServiceError> {
        let image_data = encode::to_image_data(image)?;

        // Instruction in the system turn; the user turn carries the image.
        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images("", vec![image_data]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ServiceError::Api {
                message: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            image.page_number, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(ServiceError::NoResponse);
        }
        Ok(response.content)
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider` — a pre-built provider, used as-is.
/// 2. `config.provider_name` (+ `config.model`).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. `ProviderFactory::from_env` auto-detection.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2TableError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2TableError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Default vision model when none is configured.
///
/// Table reading is less forgiving than prose transcription, so the default
/// is the mini tier rather than nano.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2TableError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2TableError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
