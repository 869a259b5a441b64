//! AUGUR Test Utilities
//!
//! Shared test infrastructure for the AUGUR workspace:
//! - Scripted and recording providers
//! - Callback collectors for the non-blocking submission API
//! - Proptest generators
//! - Config fixtures and custom assertions

// Re-export the scripted provider from its source crate
pub use augur_llm::{ProviderCall, ScriptStep, ScriptedProvider};

// Re-export core types for convenience
pub use augur_core::{
    compute_prompt_hash, normalize_prompt, AugurConfig, AugurError, CallType, CircuitState,
    GenerationRequest, GenerationResponse, LlmError, ProviderKind, ReplayMode, ResolvedResponse,
    ResponseSource,
};
pub use augur_llm::{Completion, GenerationProvider};

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// RECORDING PROVIDER
// ============================================================================

/// Wraps another provider and records every request it receives.
pub struct RecordingProvider {
    inner: Arc<dyn GenerationProvider>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingProvider {
    pub fn new(inner: Arc<dyn GenerationProvider>) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl GenerationProvider for RecordingProvider {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        lock(&self.requests).push(request.clone());
        self.inner.generate(request).await
    }
}

// ============================================================================
// CALLBACK COLLECTOR
// ============================================================================

/// Collects completions delivered to callbacks, in delivery order.
#[derive(Clone, Default)]
pub struct CallbackCollector {
    completions: Arc<Mutex<Vec<Completion>>>,
    delivered: Arc<Notify>,
}

impl CallbackCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that stores its completion here.
    pub fn callback(&self) -> impl FnOnce(Completion) + Send + 'static {
        let completions = Arc::clone(&self.completions);
        let delivered = Arc::clone(&self.delivered);
        move |completion| {
            lock(&completions).push(completion);
            delivered.notify_waiters();
        }
    }

    pub fn completions(&self) -> Vec<Completion> {
        lock(&self.completions).clone()
    }

    /// Successful completions only.
    pub fn resolved(&self) -> Vec<ResolvedResponse> {
        lock(&self.completions)
            .iter()
            .filter_map(|completion| completion.as_ref().ok().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.completions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` completions have been delivered.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.delivered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for AUGUR types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a CallType variant.
    pub fn arb_call_type() -> impl Strategy<Value = CallType> {
        prop_oneof![
            Just(CallType::Decision),
            Just(CallType::Narrative),
            Just(CallType::Conversation),
        ]
    }

    /// Generate a prompt of 1-12 lowercase words.
    pub fn arb_prompt() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,8}", 1..12).prop_map(|words| words.join(" "))
    }

    /// Generate a prompt with random casing and whitespace noise.
    pub fn arb_noisy_prompt() -> impl Strategy<Value = (String, String)> {
        prop::collection::vec(("[a-zA-Z]{1,8}", "[ \t\n]{1,3}"), 1..8).prop_map(|parts| {
            let clean = parts
                .iter()
                .map(|(word, _)| word.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ");
            let noisy: String = parts.iter().map(|(word, ws)| format!("{}{}", word, ws)).collect();
            (clean, noisy)
        })
    }

    /// Generate an error the resilience layer retries.
    pub fn arb_retryable_error() -> impl Strategy<Value = LlmError> {
        prop_oneof![
            (1u64..10_000).prop_map(|after_ms| LlmError::Timeout {
                provider: "mock".to_string(),
                after_ms,
            }),
            "[a-z ]{0,20}".prop_map(|message| LlmError::NetworkFailure {
                provider: "mock".to_string(),
                message,
            }),
            prop_oneof![Just(408u16), Just(429u16), 500u16..600].prop_map(|status| {
                LlmError::ProviderError {
                    provider: "mock".to_string(),
                    status,
                    message: "transient".to_string(),
                }
            }),
        ]
    }

    /// Generate an error surfaced to the caller without retry.
    pub fn arb_non_retryable_error() -> impl Strategy<Value = LlmError> {
        prop_oneof![
            prop_oneof![Just(400u16), Just(401u16), Just(403u16), Just(404u16), Just(422u16)]
                .prop_map(|status| LlmError::ProviderError {
                    provider: "mock".to_string(),
                    status,
                    message: "permanent".to_string(),
                }),
            Just(LlmError::ProviderUnavailable {
                provider: "mock".to_string(),
            }),
            "[a-z ]{0,20}".prop_map(|reason| LlmError::MalformedResponse {
                provider: "mock".to_string(),
                reason,
            }),
        ]
    }

    /// Generate a successful response with plausible usage.
    pub fn arb_generation_response() -> impl Strategy<Value = GenerationResponse> {
        ("[a-zA-Z .,]{1,80}", 0u32..4_000, 0u32..1_000, 0u64..30_000).prop_map(
            |(content, input, output, duration_ms)| {
                let cost = input as f64 * 0.000_000_8 + output as f64 * 0.000_004;
                GenerationResponse::success(content, input, output, cost, duration_ms)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations for common testing scenarios.

    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Default configuration with short backoff delays.
    pub fn fast_config() -> AugurConfig {
        let mut config = AugurConfig::default();
        config.retry.max_retries = 3;
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 80;
        config
    }

    /// Like [`fast_config`], but the caller drives `drain()`.
    pub fn manual_drain_config() -> AugurConfig {
        let mut config = fast_config();
        config.dispatch.auto_drain = false;
        config
    }

    pub fn record_config(path: &Path) -> AugurConfig {
        let mut config = fast_config();
        config.replay.mode = ReplayMode::Record;
        config.replay.path = Some(path.to_path_buf());
        config
    }

    pub fn replay_config(path: &Path) -> AugurConfig {
        let mut config = fast_config();
        config.replay.mode = ReplayMode::Replay;
        config.replay.path = Some(path.to_path_buf());
        config
    }

    /// A fresh temp dir and a replay log path inside it.
    ///
    /// Keep the `TempDir` alive for as long as the path is used.
    pub fn temp_replay_path() -> std::io::Result<(TempDir, PathBuf)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("replay.jsonl");
        Ok((dir, path))
    }

    /// A scripted provider that fails `count` times with timeouts.
    pub fn timing_out_provider(count: usize) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new("mock").failing_with_timeouts(count))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for AUGUR completions.

    use super::*;

    /// Assert a completion was served from cache at zero cost.
    #[track_caller]
    pub fn assert_cache_hit(resolved: &ResolvedResponse) {
        assert_eq!(resolved.source, ResponseSource::Cache, "expected a cache hit: {:?}", resolved);
        assert_eq!(resolved.response.total_tokens(), 0, "cache hits carry no tokens");
        assert_eq!(resolved.response.cost_usd, 0.0, "cache hits carry no cost");
        assert_eq!(resolved.attempts, 0);
    }

    /// Assert a completion came from the offline backend at zero cost.
    #[track_caller]
    pub fn assert_offline(resolved: &ResolvedResponse) {
        assert!(resolved.source.is_offline(), "expected offline source: {:?}", resolved);
        assert_eq!(resolved.response.cost_usd, 0.0);
        assert_eq!(resolved.response.total_tokens(), 0);
        assert!(resolved.response.success);
    }

    /// Assert a completion is the replay integrity fault for `(tick, call_type)`.
    #[track_caller]
    pub fn assert_replay_key_missing(completion: &Completion, tick: u64, call_type: CallType) {
        match completion {
            Err(LlmError::ReplayKeyMissing {
                tick: t,
                call_type: c,
            }) => {
                assert_eq!(*t, tick, "wrong tick in ReplayKeyMissing");
                assert_eq!(*c, call_type, "wrong call type in ReplayKeyMissing");
            }
            other => panic!("Expected ReplayKeyMissing, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
