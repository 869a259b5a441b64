//! Generation backend implementations
//!
//! Concrete implementations of [`GenerationProvider`]: a remote hosted API
//! (Anthropic), a local inference server (Ollama) and the deterministic
//! offline backend. [`Backend`] selects one of them from configuration.

pub mod anthropic;
pub mod offline;
pub mod ollama;

pub use anthropic::{AnthropicClient, RemoteProvider};
pub use offline::OfflineProvider;
pub use ollama::LocalProvider;

use crate::GenerationProvider;
use async_trait::async_trait;
use augur_core::{GenerationRequest, GenerationResponse, LlmError, ProviderKind, ProviderSettings};

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn classify_status(provider: &str, status: u16, message: impl Into<String>) -> LlmError {
    LlmError::ProviderError {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

/// Map a transport error to the error taxonomy.
pub(crate) fn transport_failure(provider: &str, err: &reqwest::Error, timeout_ms: u64) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
            after_ms: timeout_ms,
        }
    } else {
        LlmError::NetworkFailure {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) fn malformed(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::MalformedResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// Estimate the USD cost of a call from per-1k-token prices.
pub fn estimate_cost(
    input_tokens: u32,
    completion_tokens: u32,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
) -> f64 {
    (input_tokens as f64 / 1000.0) * input_cost_per_1k
        + (completion_tokens as f64 / 1000.0) * output_cost_per_1k
}

/// System instruction per call type, shared by the live backends.
pub(crate) fn system_prompt(request: &GenerationRequest) -> &'static str {
    match request.call_type {
        augur_core::CallType::Decision => {
            "You interpret a player's decision inside a settlement simulation. \
             Answer with a short, literal interpretation of the intended action."
        }
        augur_core::CallType::Narrative => {
            "You narrate events inside a settlement simulation. \
             Write two or three vivid sentences in the past tense."
        }
        augur_core::CallType::Conversation => {
            "You voice a villager in a settlement simulation. \
             Reply with one short line of in-character dialogue."
        }
    }
}

/// Backend selected at construction time.
pub enum Backend {
    Remote(RemoteProvider),
    Local(LocalProvider),
    Offline(OfflineProvider),
}

impl Backend {
    /// Build the backend named by the provider settings.
    pub fn from_config(settings: &ProviderSettings) -> Self {
        match settings.kind {
            ProviderKind::Remote => Self::Remote(RemoteProvider::from_settings(settings)),
            ProviderKind::Local => Self::Local(LocalProvider::new(settings.endpoint(), settings.model())),
            ProviderKind::Offline => Self::Offline(OfflineProvider::new()),
        }
    }

    fn inner(&self) -> &dyn GenerationProvider {
        match self {
            Self::Remote(provider) => provider,
            Self::Local(provider) => provider,
            Self::Offline(provider) => provider,
        }
    }
}

#[async_trait]
impl GenerationProvider for Backend {
    fn provider_id(&self) -> &str {
        self.inner().provider_id()
    }

    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    fn is_configured(&self) -> bool {
        self.inner().is_configured()
    }

    async fn is_available(&self) -> bool {
        self.inner().is_available().await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.inner().generate(request).await
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(provider) => f.debug_tuple("Remote").field(provider).finish(),
            Self::Local(provider) => f.debug_tuple("Local").field(provider).finish(),
            Self::Offline(provider) => f.debug_tuple("Offline").field(provider).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost() {
        let cost = estimate_cost(1000, 500, 0.001, 0.004);
        assert!((cost - 0.003).abs() < 1e-12);
        assert_eq!(estimate_cost(0, 0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_classify_status_keeps_status() {
        let err = classify_status("anthropic", 529, "overloaded");
        assert!(err.is_retryable());
        let err = classify_status("anthropic", 401, "bad key");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_backend_from_config_selects_kind() {
        let mut settings = ProviderSettings::default();
        settings.kind = ProviderKind::Offline;
        assert_eq!(Backend::from_config(&settings).kind(), ProviderKind::Offline);

        settings.kind = ProviderKind::Local;
        assert_eq!(Backend::from_config(&settings).kind(), ProviderKind::Local);

        settings.kind = ProviderKind::Remote;
        let backend = Backend::from_config(&settings);
        assert_eq!(backend.kind(), ProviderKind::Remote);
        assert_eq!(backend.provider_id(), "anthropic");
    }

    #[tokio::test]
    async fn test_remote_without_key_is_unavailable() {
        let settings = ProviderSettings::default();
        let backend = Backend::from_config(&settings);
        assert!(!backend.is_available().await);
    }
}
