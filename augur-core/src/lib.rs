//! AUGUR Core - Orchestration Types
//!
//! Pure data structures shared by the orchestration layer: call types,
//! generation requests and responses, the error taxonomy, configuration and
//! health reporting. Behaviour (providers, caching, retries, dispatch) lives
//! in augur-llm.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod health;
pub mod llm;

pub use config::{
    AugurConfig, CacheConfig, CircuitConfig, DispatchConfig, GenerationConfig, GenerationParams,
    LedgerConfig, ProviderSettings, ReplayConfig, ReplayMode, RetryConfig, TimeoutConfig,
};
pub use error::{AugurError, AugurResult, ConfigError, ErrorClass, LlmError, ReplayError};
pub use health::{HealthCheck, HealthStatus};
pub use llm::{
    CallType, CallTypeParseError, CircuitState, GenerationRequest, GenerationResponse,
    ProviderKind, ProviderKindParseError, ResolvedResponse, ResponseSource,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Request identifier using UUIDv7 so ids sort by submission time.
pub type RequestId = Uuid;

/// Simulation tick number supplied by the caller.
pub type Tick = u64;

/// Hex-encoded SHA-256 of a normalized prompt.
pub type PromptHash = String;

/// Generate a new UUIDv7 request id.
pub fn new_request_id() -> RequestId {
    Uuid::now_v7()
}

// ============================================================================
// PROMPT HASHING
// ============================================================================

/// Normalize a prompt for content addressing.
///
/// Lower-cases the text, trims it and collapses every whitespace run to a
/// single space, so prompts differing only in case or spacing share a key.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the content hash of a prompt (hex SHA-256 of the normalized text).
pub fn compute_prompt_hash(prompt: &str) -> PromptHash {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(prompt).as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_id_is_v7() {
        let id = new_request_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_normalize_prompt_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_prompt("  Allocate   FOOD\tto\nfarmers "),
            "allocate food to farmers"
        );
    }

    #[test]
    fn test_normalize_prompt_empty() {
        assert_eq!(normalize_prompt("   \n\t "), "");
    }

    #[test]
    fn test_prompt_hash_is_case_and_whitespace_insensitive() {
        let a = compute_prompt_hash("allocate food to farmers");
        let b = compute_prompt_hash("  Allocate Food   to FARMERS");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_prompt_hash_differs_for_different_prompts() {
        assert_ne!(
            compute_prompt_hash("allocate food to farmers"),
            compute_prompt_hash("allocate food to soldiers")
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Normalizing twice yields the same text as normalizing once.
        #[test]
        fn prop_normalize_is_idempotent(text in ".{0,80}") {
            let once = normalize_prompt(&text);
            prop_assert_eq!(normalize_prompt(&once), once.clone());
        }

        /// Extra surrounding and repeated whitespace never changes the hash.
        #[test]
        fn prop_hash_ignores_padding(words in prop::collection::vec("[a-zA-Z]{1,8}", 1..8)) {
            let tight = words.join(" ");
            let loose = format!("  {}  ", words.join("   "));
            prop_assert_eq!(compute_prompt_hash(&tight), compute_prompt_hash(&loose));
        }
    }
}
