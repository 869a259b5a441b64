//! Anthropic HTTP client with rate limiting

use super::types::ApiError;
use crate::providers::{classify_status, malformed, transport_failure};
use augur_core::LlmError;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

pub(crate) const PROVIDER_ID: &str = "anthropic";

/// Anthropic API client with rate limiting.
pub struct AnthropicClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
    min_request_interval: Duration,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key; `None` leaves the client unavailable
    /// * `base_url` - API base URL (e.g. "https://api.anthropic.com/v1")
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let permits = requests_per_minute as usize;
        let min_interval_ms = (60_000 / requests_per_minute as u64).max(10);

        Self {
            client: Client::new(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(Semaphore::new(permits)),
            last_request: Mutex::new(None),
            min_request_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Make an API request with automatic rate limiting.
    ///
    /// The `timeout` bounds the HTTP exchange; the caller's own budget may be
    /// shorter.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Res, LlmError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| LlmError::ProviderUnavailable {
            provider: PROVIDER_ID.to_string(),
        })?;

        let _permit = self.rate_limiter.acquire().await.map_err(|e| LlmError::NetworkFailure {
            provider: PROVIDER_ID.to_string(),
            message: format!("Rate limiter error: {}", e),
        })?;

        // Enforce minimum interval between requests
        {
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.min_request_interval {
                    tokio::time::sleep(self.min_request_interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        let url = format!("{}/{}", self.base_url, endpoint);
        let timeout_ms = timeout.as_millis() as u64;
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_failure(PROVIDER_ID, &e, timeout_ms))?;

        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| malformed(PROVIDER_ID, format!("Failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => format!("{}: {}", api_error.error.r#type, api_error.error.message),
                Err(_) => error_text,
            };

            Err(classify_status(PROVIDER_ID, status.as_u16(), error_msg))
        }
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("min_request_interval", &self.min_request_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_key_is_treated_as_missing() {
        let client = AnthropicClient::new(Some("   ".to_string()), "https://example.test/v1/", 50);
        assert!(!client.has_api_key());
        assert_eq!(client.base_url, "https://example.test/v1");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = AnthropicClient::new(Some("sk-ant-secret".to_string()), "https://example.test", 50);
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-ant-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_request_without_key_is_unavailable() {
        let client = AnthropicClient::new(None, "https://example.test", 50);
        let result: Result<serde_json::Value, LlmError> = client
            .request("messages", &serde_json::json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(LlmError::ProviderUnavailable { .. })));
    }
}
