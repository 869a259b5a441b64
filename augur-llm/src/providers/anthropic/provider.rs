//! Remote generation backend on the Anthropic Messages API

use super::client::{AnthropicClient, PROVIDER_ID};
use super::types::{Message, MessageRequest, MessageResponse};
use crate::providers::{estimate_cost, malformed, system_prompt};
use crate::GenerationProvider;
use async_trait::async_trait;
use augur_core::{GenerationRequest, GenerationResponse, LlmError, ProviderKind, ProviderSettings};
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on one HTTP exchange; lane budgets are enforced above this.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote hosted backend. Available iff an API key is configured.
pub struct RemoteProvider {
    client: AnthropicClient,
    model: String,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
}

impl RemoteProvider {
    /// Create a new remote provider.
    ///
    /// # Arguments
    /// * `client` - Configured Anthropic client
    /// * `model` - Model name (e.g. "claude-3-5-haiku-latest")
    pub fn new(client: AnthropicClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }

    /// Set the per-1k-token prices used for cost estimation.
    pub fn with_pricing(mut self, input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_cost_per_1k;
        self.output_cost_per_1k = output_cost_per_1k;
        self
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let client = AnthropicClient::new(
            settings.api_key.clone(),
            settings.endpoint(),
            settings.requests_per_minute,
        );
        Self::new(client, settings.model())
            .with_pricing(settings.input_cost_per_1k, settings.output_cost_per_1k)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationProvider for RemoteProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn is_configured(&self) -> bool {
        self.client.has_api_key()
    }

    async fn is_available(&self) -> bool {
        self.client.has_api_key()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let body = MessageRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            system: Some(system_prompt(request).to_string()),
            temperature: Some(request.temperature),
        };

        let started = Instant::now();
        let response: MessageResponse = self.client.request("messages", &body, HTTP_TIMEOUT).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let content = response.text();
        if content.trim().is_empty() {
            return Err(malformed(PROVIDER_ID, "No text content in response"));
        }

        let cost = estimate_cost(
            response.usage.input_tokens,
            response.usage.output_tokens,
            self.input_cost_per_1k,
            self.output_cost_per_1k,
        );

        Ok(GenerationResponse::success(
            content,
            response.usage.input_tokens,
            response.usage.output_tokens,
            cost,
            duration_ms,
        ))
    }
}

impl std::fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("client", &self.client)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_available_only_with_key() {
        let mut settings = ProviderSettings::default();
        assert!(!RemoteProvider::from_settings(&settings).is_available().await);

        settings.api_key = Some("sk-ant-test".to_string());
        let provider = RemoteProvider::from_settings(&settings);
        assert!(provider.is_available().await);
        assert_eq!(provider.model(), augur_core::config::DEFAULT_REMOTE_MODEL);
    }

    #[tokio::test]
    async fn test_generate_without_key_fails_non_retryable() {
        let provider = RemoteProvider::from_settings(&ProviderSettings::default());
        let request = GenerationRequest::new("allocate food to farmers", augur_core::CallType::Decision);
        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderUnavailable { .. }));
        assert!(!err.is_retryable());
    }
}
