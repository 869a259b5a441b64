//! Error types for AUGUR operations

use crate::{CallType, Tick};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the resilience layer must treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transient; retried with backoff and may trip the circuit.
    Retryable,
    /// Permanent for this request; surfaced to the caller immediately.
    NonRetryable,
    /// The replay trace is incomplete or diverged.
    IntegrityFault,
}

/// Generation failures, classified once at the backend boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmError {
    #[error("Request to {provider} timed out after {after_ms}ms")]
    Timeout { provider: String, after_ms: u64 },

    #[error("Network failure talking to {provider}: {message}")]
    NetworkFailure { provider: String, message: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Malformed response from {provider}: {reason}")]
    MalformedResponse { provider: String, reason: String },

    #[error("Provider {provider} is unavailable (no credential or endpoint configured)")]
    ProviderUnavailable { provider: String },

    #[error("Replay log has no entry for tick {tick} and call type {call_type}")]
    ReplayKeyMissing { tick: Tick, call_type: CallType },
}

impl LlmError {
    /// Classify this error for retry decisions.
    ///
    /// Provider status 408, 429 and 5xx are transient. Authentication,
    /// malformed-request and not-found statuses are permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } | Self::NetworkFailure { .. } => ErrorClass::Retryable,
            Self::ProviderError { status, .. } => {
                if *status == 408 || *status == 429 || (500..600).contains(status) {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::NonRetryable
                }
            }
            Self::MalformedResponse { .. } | Self::ProviderUnavailable { .. } => {
                ErrorClass::NonRetryable
            }
            Self::ReplayKeyMissing { .. } => ErrorClass::IntegrityFault,
        }
    }

    /// Returns true if the resilience layer should retry this error.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Returns true if this error signals a determinism break in replay.
    pub fn is_integrity_fault(&self) -> bool {
        self.class() == ErrorClass::IntegrityFault
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: &'static str },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Replay log persistence errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Replay log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Replay record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt replay record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Replay log is not in record mode")]
    NotRecording,
}

/// Master error type for all AUGUR errors.
#[derive(Debug, Error)]
pub enum AugurError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Orchestrator is shut down")]
    ShutDown,

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

/// Result type alias for AUGUR operations.
pub type AugurResult<T> = Result<T, AugurError>;

// =============================================================================
// TESTS
// =============================================================================
