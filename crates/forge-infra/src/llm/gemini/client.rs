//! GeminiProvider -- concrete [`GenerationProvider`] for Google Gemini.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is only exposed
//! when building the `x-goog-api-key` header.

use std::time::Duration;

use secrecy::SecretString;

use forge_core::llm::provider::{GenerationProvider, GenerationStream};
use forge_types::chat::MessageRole;
use forge_types::config::GenerationConfig;
use forge_types::llm::{GenerationError, GenerationRequest};

use super::streaming::create_gemini_stream;
use super::types::{GeminiContent, GeminiGenerationConfig, GeminiRequest};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini streaming provider.
///
/// Does not derive `Debug` so the key never reaches log output.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString, model: String) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| GenerationError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
        })
    }

    /// Build a provider from the `[generation]` config section.
    pub fn from_config(
        config: &GenerationConfig,
        api_key: SecretString,
    ) -> Result<Self, GenerationError> {
        Ok(Self::new(api_key, config.model.clone())?.with_base_url(config.base_url.clone()))
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// `{base}/v1beta/models/{model}:streamGenerateContent?alt=sse`
    fn stream_url(&self, model: &str) -> String {
        let model = if model.is_empty() { &self.model } else { model };
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }

    /// Convert a generic [`GenerationRequest`] into a [`GeminiRequest`].
    ///
    /// History comes first in chronological order, then the new prompt as
    /// the final `user` turn. Assistant turns use Gemini's `model` role.
    fn to_gemini_request(request: &GenerationRequest) -> GeminiRequest {
        let mut contents: Vec<GeminiContent> = request
            .history
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };
                GeminiContent::text(Some(role), m.content.clone())
            })
            .collect();
        contents.push(GeminiContent::text(Some("user"), request.prompt.clone()));

        let system_instruction = (!request.system.trim().is_empty())
            .then(|| GeminiContent::text(None, request.system.clone()));

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
            }),
        }
    }
}

impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn stream(&self, request: GenerationRequest) -> GenerationStream {
        let url = self.stream_url(&request.model);
        let body = Self::to_gemini_request(&request);
        create_gemini_stream(&self.client, &url, body, &self.api_key)
    }
}
