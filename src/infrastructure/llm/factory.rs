use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::http_client::HttpClient;
use super::{LlmFieldExtractor, LlmMessageGenerator, OpenAiProvider, StubCapabilities};
use crate::config::{LlmBackend, LlmConfig};
use crate::domain::workflow::Capabilities;
use crate::domain::{DomainError, LlmProvider};

/// Builds the extraction and generation capabilities selected by configuration
#[derive(Debug)]
pub struct CapabilitiesFactory;

impl CapabilitiesFactory {
    pub fn create(config: &LlmConfig) -> Result<Capabilities, DomainError> {
        match config.provider {
            LlmBackend::OpenAi => {
                let provider = Self::openai(config)?;
                Ok(Capabilities::new(
                    Arc::new(LlmFieldExtractor::new(provider.clone(), &config.model)),
                    Arc::new(LlmMessageGenerator::new(provider, &config.model)),
                ))
            }
            LlmBackend::Stub => {
                warn!("Using stub extraction and generation; responses are placeholders");
                Ok(Capabilities::new(
                    Arc::new(StubCapabilities),
                    Arc::new(StubCapabilities),
                ))
            }
        }
    }

    fn openai(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, DomainError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                DomainError::configuration("llm.api_key is required when llm.provider = openai")
            })?;

        let client = HttpClient::with_timeout(Duration::from_secs(config.timeout_secs))?;
        let provider = OpenAiProvider::with_base_url(client, api_key, &config.base_url);

        Ok(Arc::new(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_api_key() {
        let config = LlmConfig::default();

        let err = CapabilitiesFactory::create(&config).unwrap_err();
        assert!(matches!(err, DomainError::Configuration { .. }));
    }

    #[test]
    fn test_openai_with_api_key() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };

        assert!(CapabilitiesFactory::create(&config).is_ok());
    }

    #[test]
    fn test_stub_backend() {
        let config = LlmConfig {
            provider: LlmBackend::Stub,
            ..LlmConfig::default()
        };

        assert!(CapabilitiesFactory::create(&config).is_ok());
    }
}
