//! Local generation backend on an Ollama server

use super::types::{GenerateOptions, GenerateRequest, GenerateResponse, ListModelsResponse};
use crate::providers::{classify_status, malformed, system_prompt, transport_failure};
use crate::GenerationProvider;
use async_trait::async_trait;
use augur_core::{GenerationRequest, GenerationResponse, LlmError, ProviderKind};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const PROVIDER_ID: &str = "ollama";
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_TTL: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Local inference backend. Available iff its endpoint answers; never charges.
pub struct LocalProvider {
    client: Client,
    base_url: String,
    model: String,
    probe: Mutex<Option<(Instant, bool)>>,
}

impl LocalProvider {
    /// Create a new local provider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "llama3.2", "mistral")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            probe: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check whether the server answers and lists the configured model.
    pub async fn check_model_available(&self) -> Result<bool, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_failure(PROVIDER_ID, &e, PROBE_TIMEOUT.as_millis() as u64))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let list: ListModelsResponse = response
            .json()
            .await
            .map_err(|e| malformed(PROVIDER_ID, format!("Failed to parse models list: {}", e)))?;

        Ok(list.models.iter().any(|m| m.name.contains(&self.model)))
    }
}

#[async_trait]
impl GenerationProvider for LocalProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.model.is_empty()
    }

    async fn is_available(&self) -> bool {
        let mut probe = self.probe.lock().await;
        if let Some((checked_at, available)) = *probe {
            if checked_at.elapsed() < PROBE_TTL {
                return available;
            }
        }

        let available = match self.check_model_available().await {
            Ok(available) => available,
            Err(e) => {
                tracing::debug!(provider = PROVIDER_ID, error = %e, "Local endpoint probe failed");
                false
            }
        };
        *probe = Some((Instant::now(), available));
        available
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            system: Some(system_prompt(request).to_string()),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.base_url);
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .timeout(HTTP_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_failure(PROVIDER_ID, &e, HTTP_TIMEOUT.as_millis() as u64))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(PROVIDER_ID, status.as_u16(), error_text));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| malformed(PROVIDER_ID, format!("Failed to parse response: {}", e)))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        if generated.response.trim().is_empty() {
            return Err(malformed(PROVIDER_ID, "Empty completion"));
        }

        Ok(GenerationResponse::success(
            generated.response,
            generated.prompt_eval_count.unwrap_or(0),
            generated.eval_count.unwrap_or(0),
            0.0,
            duration_ms,
        ))
    }
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let provider = LocalProvider::new("http://localhost:11434/", "llama3.2");
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.model(), "llama3.2");
        assert_eq!(provider.kind(), ProviderKind::Local);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        // Port 9 (discard) on loopback is not an Ollama server.
        let provider = LocalProvider::new("http://127.0.0.1:9", "llama3.2");
        assert!(!provider.is_available().await);
        // Unreachable is not unconfigured: calls go through and fail retryably.
        assert!(provider.is_configured());
        assert!(!LocalProvider::new("", "llama3.2").is_configured());
    }
}
