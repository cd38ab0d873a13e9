//! Generation provider implementations.
//!
//! Contains the Gemini implementation of the [`GenerationProvider`] trait
//! defined in `forge-core`, and a factory that builds the configured provider.

pub mod gemini;

use std::sync::Arc;

use secrecy::SecretString;

use forge_core::llm::provider::GenerationProvider;
use forge_core::llm::scripted::ScriptedProvider;
use forge_types::config::{GenerationConfig, ProviderKind};
use forge_types::llm::GenerationError;

use self::gemini::GeminiProvider;

/// Canned reply used by the scripted provider.
const SCRIPTED_REPLY: &str = "The lantern flickers as the innkeeper leans closer. \
\"Strangers rarely come this far north,\" she murmurs, sliding a worn map across the bar.";

/// Build the provider selected by `config.provider`.
///
/// Gemini needs an API key; a missing key is `AuthenticationFailed`.
pub fn create_provider(
    config: &GenerationConfig,
    api_key: Option<SecretString>,
) -> Result<Arc<dyn GenerationProvider>, GenerationError> {
    match config.provider {
        ProviderKind::Gemini => {
            let key = api_key.ok_or(GenerationError::AuthenticationFailed)?;
            Ok(Arc::new(GeminiProvider::from_config(config, key)?))
        }
        ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::from_text(SCRIPTED_REPLY))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_gemini_provider() {
        let provider = create_provider(
            &GenerationConfig::default(),
            Some(SecretString::from("key".to_string())),
        )
        .unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), "gemini-1.5-flash-latest");
    }

    #[test]
    fn test_create_gemini_without_key_fails() {
        let result = create_provider(&GenerationConfig::default(), None);
        assert!(matches!(result, Err(GenerationError::AuthenticationFailed)));
    }

    #[test]
    fn test_create_scripted_provider() {
        let config = GenerationConfig {
            provider: ProviderKind::Scripted,
            ..GenerationConfig::default()
        };
        let provider = create_provider(&config, None).unwrap();
        assert_eq!(provider.name(), "scripted");
    }
}
