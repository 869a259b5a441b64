//! Retry, backoff and circuit breaking around a generation provider
//!
//! [`ResilienceController::execute`] is the only path from the dispatcher to
//! a live backend:
//!
//! - each attempt is bounded by the caller's timeout;
//! - retryable failures are retried with exponential backoff up to the
//!   configured limit;
//! - exhausting the limit trips the [`CircuitBreaker`] and answers the
//!   current request from the offline backend;
//! - while the circuit is open every request is answered offline without
//!   touching the provider or spending retry budget.

use crate::providers::OfflineProvider;
use crate::GenerationProvider;
use augur_core::{
    CircuitConfig, CircuitState, GenerationRequest, GenerationResponse, LlmError, ResponseSource,
    RetryConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Exponential backoff: `min(base * 2^n, max)` before retry `n` (0-based).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_delay(), config.max_delay())
    }

    /// Delay to wait before retry number `retry` (0 = first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Total provider invocations allowed for one request.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Two-state breaker that stays open for a fixed cooldown once tripped.
pub struct CircuitBreaker {
    opened_at: RwLock<Option<Instant>>,
    cooldown: Duration,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            opened_at: RwLock::new(None),
            cooldown,
            trips: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CircuitConfig) -> Self {
        Self::new(config.cooldown())
    }

    /// Current state. Closes the circuit once the cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        let opened_at = match self.opened_at.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };

        match opened_at {
            None => CircuitState::Closed,
            Some(opened) if opened.elapsed() <= self.cooldown => CircuitState::Open,
            Some(_) => {
                if let Ok(mut guard) = self.opened_at.write() {
                    if guard.map_or(false, |opened| opened.elapsed() > self.cooldown) {
                        *guard = None;
                        tracing::info!(
                            cooldown_ms = self.cooldown.as_millis() as u64,
                            "Circuit closed after cooldown"
                        );
                    }
                }
                self.state_without_transition()
            }
        }
    }

    fn state_without_transition(&self) -> CircuitState {
        match self.opened_at.read() {
            Ok(guard) if guard.is_some() => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Open the circuit for one cooldown, starting now.
    pub fn trip(&self) {
        if let Ok(mut guard) = self.opened_at.write() {
            *guard = Some(Instant::now());
        }
        let trips = self.trips.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            cooldown_ms = self.cooldown.as_millis() as u64,
            trips,
            "Circuit opened; serving offline until cooldown elapses"
        );
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.opened_at.write() {
            *guard = None;
        }
    }

    /// Number of times the circuit has opened.
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }

    /// Time left until the circuit closes, if open.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let opened_at = self.opened_at.read().ok().and_then(|guard| *guard)?;
        self.cooldown.checked_sub(opened_at.elapsed()).filter(|d| !d.is_zero())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("cooldown", &self.cooldown)
            .field("trips", &self.trips())
            .finish()
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Result of one resilient execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub response: GenerationResponse,
    pub source: ResponseSource,
    /// Provider invocations made; zero when the circuit was already open.
    pub attempts: u32,
}

/// Wraps a provider with timeouts, retry and the circuit breaker.
pub struct ResilienceController {
    primary: Arc<dyn GenerationProvider>,
    offline: OfflineProvider,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ResilienceController {
    pub fn new(primary: Arc<dyn GenerationProvider>, policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            primary,
            offline: OfflineProvider::new(),
            policy,
            breaker,
        }
    }

    pub fn primary(&self) -> &Arc<dyn GenerationProvider> {
        &self.primary
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a request with per-attempt `timeout`.
    ///
    /// Retryable failures never reach the caller: they end in a provider
    /// response or an offline fallback. Non-retryable failures are returned
    /// as errors without touching the circuit.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, LlmError> {
        if self.breaker.is_open() {
            return Ok(self.offline_outcome(request, ResponseSource::CircuitOpen, 0));
        }

        if !self.primary.is_configured() {
            return Err(LlmError::ProviderUnavailable {
                provider: self.primary.provider_id().to_string(),
            });
        }

        let max_attempts = self.policy.max_attempts();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.attempt(request, timeout).await {
                Ok(response) => {
                    return Ok(ExecutionOutcome {
                        response,
                        source: ResponseSource::Provider,
                        attempts,
                    });
                }
                Err(err) if !err.is_retryable() => {
                    tracing::warn!(
                        provider = self.primary.provider_id(),
                        call_type = %request.call_type,
                        attempt = attempts,
                        error = %err,
                        "Non-retryable provider failure"
                    );
                    return Err(err);
                }
                Err(err) => err,
            };

            if attempts >= max_attempts {
                tracing::warn!(
                    provider = self.primary.provider_id(),
                    call_type = %request.call_type,
                    attempts,
                    error = %err,
                    "Retries exhausted; falling back to offline backend"
                );
                self.breaker.trip();
                return Ok(self.offline_outcome(request, ResponseSource::Fallback, attempts));
            }

            let delay = self.policy.delay_for_retry(attempts - 1);
            tracing::warn!(
                provider = self.primary.provider_id(),
                call_type = %request.call_type,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable provider failure; backing off"
            );
            tokio::time::sleep(delay).await;

            // Another request may have tripped the circuit while we slept.
            if self.breaker.is_open() {
                return Ok(self.offline_outcome(request, ResponseSource::CircuitOpen, attempts));
            }
        }
    }

    /// One provider invocation bounded by `timeout`.
    ///
    /// The call runs on its own task; on timeout the task is detached and its
    /// eventual result discarded.
    async fn attempt(&self, request: &GenerationRequest, timeout: Duration) -> Result<GenerationResponse, LlmError> {
        let primary = Arc::clone(&self.primary);
        let owned = request.clone();
        let call = tokio::spawn(async move { primary.generate(&owned).await });

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LlmError::NetworkFailure {
                provider: self.primary.provider_id().to_string(),
                message: format!("provider task failed: {}", join_err),
            }),
            Err(_) => Err(LlmError::Timeout {
                provider: self.primary.provider_id().to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn offline_outcome(&self, request: &GenerationRequest, source: ResponseSource, attempts: u32) -> ExecutionOutcome {
        ExecutionOutcome {
            response: self.offline.respond(request),
            source,
            attempts,
        }
    }
}

impl std::fmt::Debug for ResilienceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceController")
            .field("primary", &self.primary.provider_id())
            .field("policy", &self.policy)
            .field("breaker", &self.breaker)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_capped(base_ms in 1u64..5_000, cap_factor in 1u64..64, retry in 0u32..40) {
            let policy = RetryPolicy::new(
                5,
                Duration::from_millis(base_ms),
                Duration::from_millis(base_ms * cap_factor),
            );
            let delay = policy.delay_for_retry(retry);
            prop_assert!(delay <= policy.max_delay);
            prop_assert!(delay >= policy.base_delay);
            prop_assert!(policy.delay_for_retry(retry + 1) >= delay);
        }
    }
}
