//! LLM-related primitive types.
//!
//! Pure data types for generation calls. Providers and orchestration live in
//! augur-llm.

use crate::{LlmError, RequestId, Tick};
use serde::{Deserialize, Serialize};

// ============================================================================
// CALL TYPE
// ============================================================================

/// Classification of a request. Determines its lane, timeout and cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// Interpretation of a player decision; tied to the current tick
    Decision,
    /// Narrative generation
    Narrative,
    /// Ambient conversation between simulated characters
    Conversation,
}

impl CallType {
    /// All call types, highest priority first.
    pub fn all() -> [CallType; 3] {
        [Self::Decision, Self::Narrative, Self::Conversation]
    }

    /// Lane priority; larger values are served first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Decision => 2,
            Self::Narrative => 1,
            Self::Conversation => 0,
        }
    }

    /// Convert to the string used in persisted replay records.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Narrative => "narrative",
            Self::Conversation => "conversation",
        }
    }

    /// Parse from the persisted string representation.
    pub fn from_db_str(s: &str) -> Result<Self, CallTypeParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decision" => Ok(Self::Decision),
            "narrative" => Ok(Self::Narrative),
            "conversation" => Ok(Self::Conversation),
            _ => Err(CallTypeParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Error parsing CallType from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTypeParseError(pub String);

impl std::fmt::Display for CallTypeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid call type: {}", self.0)
    }
}

impl std::error::Error for CallTypeParseError {}

// ============================================================================
// PROVIDER KIND
// ============================================================================

/// Backend family selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote hosted API; available iff a credential is configured
    Remote,
    /// Local inference server; available iff its endpoint is reachable
    Local,
    /// Deterministic template backend; always available
    Offline,
}

impl ProviderKind {
    /// Convert to configuration string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Offline => "offline",
        }
    }

    /// Parse from configuration string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ProviderKindParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            "offline" => Ok(Self::Offline),
            _ => Err(ProviderKindParseError(s.to_string())),
        }
    }
}

/// Error parsing ProviderKind from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderKindParseError(pub String);

impl std::fmt::Display for ProviderKindParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider kind: {}", self.0)
    }
}

impl std::error::Error for ProviderKindParseError {}

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests flow to the configured provider
    Closed,
    /// Requests are served by the offline backend until the cooldown elapses
    Open,
}

impl CircuitState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Open => "Open",
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// A single generation call as seen by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub call_type: CallType,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, call_type: CallType) -> Self {
        Self {
            prompt: prompt.into(),
            call_type,
            temperature: 0.7,
            max_tokens: 256,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Outcome of a generation call. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub success: bool,
    pub content: String,
    pub input_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LlmError>,
}

impl GenerationResponse {
    /// A successful response.
    pub fn success(
        content: impl Into<String>,
        input_tokens: u32,
        completion_tokens: u32,
        cost_usd: f64,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            content: content.into(),
            input_tokens,
            completion_tokens,
            cost_usd,
            duration_ms,
            error: None,
        }
    }

    /// A failed response carrying its classified error.
    pub fn failure(error: LlmError, duration_ms: u64) -> Self {
        Self {
            success: false,
            content: String::new(),
            input_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            duration_ms,
            error: Some(error),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens as u64 + self.completion_tokens as u64
    }

    /// Same content with usage zeroed, as served from cache.
    pub fn without_usage(&self) -> Self {
        Self {
            input_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            ..self.clone()
        }
    }

    /// Convert a failed response back into its error.
    pub fn into_result(self) -> Result<Self, LlmError> {
        match (self.success, &self.error) {
            (false, Some(err)) => Err(err.clone()),
            (false, None) => Err(LlmError::MalformedResponse {
                provider: "unknown".to_string(),
                reason: "failed response without error".to_string(),
            }),
            (true, _) => Ok(self),
        }
    }
}

/// Which path produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Live provider call
    Provider,
    /// Served from the response cache
    Cache,
    /// Circuit open; served by the offline backend without a provider call
    CircuitOpen,
    /// Retries exhausted; served by the offline backend
    Fallback,
    /// Read from the replay log
    Replay,
}

impl ResponseSource {
    /// Returns true if the text came from the offline backend.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::Fallback)
    }
}

/// A completed request as delivered to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResponse {
    pub request_id: RequestId,
    pub call_type: CallType,
    pub tick: Tick,
    pub source: ResponseSource,
    /// Provider invocations spent on this request
    pub attempts: u32,
    pub response: GenerationResponse,
}

impl ResolvedResponse {
    pub fn content(&self) -> &str {
        &self.response.content
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_type_roundtrip() {
        for call_type in CallType::all() {
            let s = call_type.as_db_str();
            assert_eq!(CallType::from_db_str(s).unwrap(), call_type);
        }
        assert!(CallType::from_db_str("gossip").is_err());
    }

    #[test]
    fn test_call_type_priority_order() {
        let [d, n, c] = CallType::all();
        assert!(d.priority() > n.priority());
        assert!(n.priority() > c.priority());
    }

    #[test]
    fn test_call_type_serde_lowercase() {
        let json = serde_json::to_string(&CallType::Narrative).unwrap();
        assert_eq!(json, "\"narrative\"");
    }

    #[test]
    fn test_provider_kind_roundtrip() {
        for kind in [ProviderKind::Remote, ProviderKind::Local, ProviderKind::Offline] {
            assert_eq!(ProviderKind::from_db_str(kind.as_db_str()).unwrap(), kind);
        }
        assert_eq!(ProviderKind::from_db_str(" LOCAL ").unwrap(), ProviderKind::Local);
    }

    #[test]
    fn test_without_usage_zeroes_cost() {
        let response = GenerationResponse::success("hello", 10, 5, 0.02, 120);
        let cached = response.without_usage();
        assert_eq!(cached.content, "hello");
        assert_eq!(cached.total_tokens(), 0);
        assert_eq!(cached.cost_usd, 0.0);
        assert!(cached.success);
    }

    #[test]
    fn test_failure_into_result() {
        let err = LlmError::ProviderUnavailable {
            provider: "anthropic".to_string(),
        };
        let response = GenerationResponse::failure(err.clone(), 0);
        assert_eq!(response.into_result().unwrap_err(), err);
    }

    #[test]
    fn test_response_source_offline() {
        assert!(ResponseSource::Fallback.is_offline());
        assert!(ResponseSource::CircuitOpen.is_offline());
        assert!(!ResponseSource::Cache.is_offline());
    }
}
