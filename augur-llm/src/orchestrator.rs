//! The orchestrator: one explicitly constructed instance per simulation
//!
//! Wires the cache, resilience controller, ledger and replay log into a
//! [`Dispatcher`] and exposes the non-blocking submission API. Lifecycle is
//! explicit: [`Orchestrator::init`] builds everything from an
//! [`AugurConfig`], [`Orchestrator::shutdown`] stops intake, drains with a
//! grace period and flushes the replay log.
//!
//! Resolution order for a dispatched request:
//! 1. replay mode: answer from the replay log, nothing else runs;
//! 2. a fresh cache entry: zero tokens, zero cost;
//! 3. the resilience controller (provider, retries, offline fallback).

use crate::cache::{CacheStats, ResponseCache};
use crate::dispatcher::{Completion, Dispatcher, Request, RequestExecutor, RequestHandle};
use crate::ledger::{UsageLedger, UsageTotals};
use crate::providers::{Backend, OfflineProvider};
use crate::replay::{ReplayLog, ReplayRecord};
use crate::resilience::{CircuitBreaker, ResilienceController, RetryPolicy};
use crate::GenerationProvider;
use async_trait::async_trait;
use augur_core::{
    compute_prompt_hash, AugurConfig, AugurResult, CallType, CircuitState,
    GenerationRequest, GenerationResponse, HealthCheck, ProviderKind, ReplayMode, RequestId,
    ResolvedResponse, ResponseSource, Tick,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const COMPONENT: &str = "augur-llm";

// ============================================================================
// PIPELINE
// ============================================================================

/// Resolves dispatched requests: replay, then cache, then the controller.
struct Pipeline {
    config: Arc<AugurConfig>,
    cache: Arc<ResponseCache>,
    ledger: Arc<UsageLedger>,
    replay: Arc<ReplayLog>,
    controller: ResilienceController,
}

impl Pipeline {
    fn replayed(&self, request: &Request, prompt_hash: &str) -> Completion {
        let record = match self.replay.lookup(request.tick, request.call_type, prompt_hash) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(
                    request_id = %request.id,
                    tick = request.tick,
                    call_type = %request.call_type,
                    "Replay log has no entry for this request"
                );
                return Err(err);
            }
        };

        if record.prompt_hash != prompt_hash {
            tracing::warn!(
                request_id = %request.id,
                tick = request.tick,
                call_type = %request.call_type,
                "Replayed prompt differs from the recorded one"
            );
        }

        let response = record.response.into_result()?;
        Ok(ResolvedResponse {
            request_id: request.id,
            call_type: request.call_type,
            tick: request.tick,
            source: ResponseSource::Replay,
            attempts: 0,
            response,
        })
    }

    async fn resolve(&self, request: &Request, prompt_hash: &str) -> Completion {
        if let Some(hit) = self.cache.lookup(prompt_hash, request.call_type) {
            tracing::trace!(request_id = %request.id, call_type = %request.call_type, "Cache hit");
            return Ok(ResolvedResponse {
                request_id: request.id,
                call_type: request.call_type,
                tick: request.tick,
                source: ResponseSource::Cache,
                attempts: 0,
                response: hit.without_usage(),
            });
        }
        tracing::trace!(request_id = %request.id, call_type = %request.call_type, "Cache miss");

        let params = self.config.generation_for(request.call_type);
        let generation = GenerationRequest::new(request.prompt.clone(), request.call_type)
            .with_temperature(params.temperature)
            .with_max_tokens(params.max_tokens);
        let timeout = self.config.timeout_for(request.call_type);

        let outcome = self.controller.execute(&generation, timeout).await?;
        let live = outcome.source == ResponseSource::Provider
            && self.controller.primary().kind() != ProviderKind::Offline;
        if live && outcome.response.success {
            self.cache.insert(prompt_hash, request.call_type, &outcome.response);
            self.ledger.record(request.call_type, &outcome.response);
        }

        Ok(ResolvedResponse {
            request_id: request.id,
            call_type: request.call_type,
            tick: request.tick,
            source: outcome.source,
            attempts: outcome.attempts,
            response: outcome.response,
        })
    }

    fn record(&self, request: &Request, prompt_hash: &str, completion: &Completion) {
        if self.replay.mode() != ReplayMode::Record {
            return;
        }
        let response = match completion {
            Ok(resolved) => resolved.response.clone(),
            Err(err) => GenerationResponse::failure(err.clone(), 0),
        };
        let record = ReplayRecord {
            tick: request.tick,
            call_type: request.call_type,
            prompt_hash: prompt_hash.to_string(),
            response,
        };
        if let Err(e) = self.replay.append(&record) {
            tracing::error!(request_id = %request.id, error = %e, "Failed to append replay record");
        }
    }
}

#[async_trait]
impl RequestExecutor for Pipeline {
    async fn execute(&self, request: &Request) -> Completion {
        let prompt_hash = compute_prompt_hash(&request.prompt);
        if self.replay.is_replaying() {
            return self.replayed(request, &prompt_hash);
        }

        let completion = self.resolve(request, &prompt_hash).await;
        self.record(request, &prompt_hash, &completion);
        completion
    }
}

// ============================================================================
// AWAITABLE SUBMISSION
// ============================================================================

/// Awaitable handle for a submitted request.
#[derive(Debug)]
pub struct PendingResponse {
    pub handle: RequestHandle,
    rx: oneshot::Receiver<Completion>,
}

impl PendingResponse {
    pub fn id(&self) -> RequestId {
        self.handle.id
    }

    /// Wait for the completion. `None` if the request was superseded,
    /// dropped or discarded at shutdown.
    pub async fn wait(self) -> Option<Completion> {
        self.rx.await.ok()
    }
}

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneStatus {
    pub call_type: CallType,
    pub pending: usize,
    pub in_flight: usize,
}

/// Point-in-time snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub tick: Tick,
    pub backend: ProviderKind,
    pub provider_id: String,
    pub circuit: CircuitState,
    pub circuit_trips: u64,
    pub replay_mode: ReplayMode,
    pub accepting: bool,
    pub lanes: Vec<LaneStatus>,
    pub cache: CacheStats,
    pub usage: UsageTotals,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Facade over dispatch, caching, resilience, accounting and replay.
pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<ResponseCache>,
    ledger: Arc<UsageLedger>,
    replay: Arc<ReplayLog>,
    breaker: Arc<CircuitBreaker>,
    backend: ProviderKind,
    provider_id: String,
    tick: AtomicU64,
}

impl Orchestrator {
    /// Build an orchestrator from configuration.
    ///
    /// If the configured backend is unavailable the orchestrator starts on
    /// the offline backend and reports itself degraded. In replay mode no
    /// provider is ever called, so availability is not checked.
    pub async fn init(config: AugurConfig) -> AugurResult<Self> {
        config.validate()?;
        let backend = Backend::from_config(&config.provider);

        let provider: Arc<dyn GenerationProvider> =
            if config.replay.mode == ReplayMode::Replay || backend.is_available().await {
                Arc::new(backend)
            } else {
                tracing::warn!(
                    backend = config.provider.kind.as_db_str(),
                    provider = backend.provider_id(),
                    "Configured backend unavailable; starting on the offline backend"
                );
                Arc::new(OfflineProvider::new())
            };

        Self::with_provider(config, provider)
    }

    /// Build an orchestrator around an explicit provider.
    pub fn with_provider(config: AugurConfig, provider: Arc<dyn GenerationProvider>) -> AugurResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let cache = Arc::new(ResponseCache::from_config(&config));
        let ledger = Arc::new(UsageLedger::with_budget_warning(config.ledger.budget_warning_usd));
        let replay = Arc::new(ReplayLog::from_config(&config.replay)?);
        let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit));
        let backend = provider.kind();
        let provider_id = provider.provider_id().to_string();

        let controller = ResilienceController::new(
            provider,
            RetryPolicy::from_config(&config.retry),
            Arc::clone(&breaker),
        );
        let pipeline = Arc::new(Pipeline {
            config: Arc::clone(&config),
            cache: Arc::clone(&cache),
            ledger: Arc::clone(&ledger),
            replay: Arc::clone(&replay),
            controller,
        });
        let dispatcher = Dispatcher::on_current_runtime(pipeline, config.dispatch.auto_drain)?;

        tracing::info!(
            backend = backend.as_db_str(),
            provider = %provider_id,
            replay_mode = ?config.replay.mode,
            cache_enabled = cache.is_enabled(),
            auto_drain = config.dispatch.auto_drain,
            "Orchestrator initialized"
        );

        Ok(Self {
            dispatcher,
            cache,
            ledger,
            replay,
            breaker,
            backend,
            provider_id,
            tick: AtomicU64::new(0),
        })
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit a request of any call type. Returns immediately.
    pub fn submit<F>(
        &self,
        call_type: CallType,
        prompt: impl Into<String>,
        correlated_entities: Vec<String>,
        callback: F,
    ) -> AugurResult<RequestHandle>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let request = Request::new(prompt, call_type, self.tick()).with_entities(correlated_entities);
        self.dispatcher.submit(request, Box::new(callback))
    }

    pub fn submit_decision_interpretation<F>(&self, prompt: impl Into<String>, callback: F) -> AugurResult<RequestHandle>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.submit(CallType::Decision, prompt, Vec::new(), callback)
    }

    pub fn submit_narrative_generation<F>(&self, prompt: impl Into<String>, callback: F) -> AugurResult<RequestHandle>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.submit(CallType::Narrative, prompt, Vec::new(), callback)
    }

    pub fn submit_ambient_conversation<F>(&self, prompt: impl Into<String>, callback: F) -> AugurResult<RequestHandle>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.submit(CallType::Conversation, prompt, Vec::new(), callback)
    }

    /// Submit and get an awaitable handle instead of a callback.
    pub fn submit_awaitable(
        &self,
        call_type: CallType,
        prompt: impl Into<String>,
        correlated_entities: Vec<String>,
    ) -> AugurResult<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let handle = self.submit(call_type, prompt, correlated_entities, move |completion| {
            // The receiver may have been dropped; nothing to deliver to then.
            let _ = tx.send(completion);
        })?;
        Ok(PendingResponse { handle, rx })
    }

    // ------------------------------------------------------------------
    // Ticks and draining
    // ------------------------------------------------------------------

    pub fn tick(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn set_tick(&self, tick: Tick) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// Advance the tick by one and return the new value.
    pub fn advance_tick(&self) -> Tick {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Dispatch ready work. Needed each tick when `auto_drain` is off.
    pub fn drain(&self) -> Vec<RequestId> {
        self.dispatcher.drain()
    }

    /// Wait until no request is pending or in flight.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn usage(&self) -> UsageTotals {
        self.ledger.totals()
    }

    pub fn usage_for(&self, call_type: CallType) -> UsageTotals {
        self.ledger.totals_for(call_type)
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Start a new accounting session.
    pub fn clear_usage(&self) {
        self.ledger.clear();
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn queue_depth(&self, call_type: CallType) -> usize {
        self.dispatcher.queue_depth(call_type)
    }

    pub fn in_flight(&self, call_type: CallType) -> usize {
        self.dispatcher.in_flight(call_type)
    }

    pub fn backend(&self) -> ProviderKind {
        self.backend
    }

    pub fn health(&self) -> HealthCheck {
        if !self.dispatcher.is_accepting() {
            return HealthCheck::unhealthy(COMPONENT, self.backend, "orchestrator is shut down");
        }
        HealthCheck::evaluate(COMPONENT, self.backend, self.circuit_state())
            .with_metadata("provider", serde_json::json!(self.provider_id))
            .with_metadata("circuit_trips", serde_json::json!(self.breaker.trips()))
            .with_metadata(
                "remaining_cooldown_ms",
                serde_json::json!(self.breaker.remaining_cooldown().map(|d| d.as_millis() as u64)),
            )
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            tick: self.tick(),
            backend: self.backend,
            provider_id: self.provider_id.clone(),
            circuit: self.circuit_state(),
            circuit_trips: self.breaker.trips(),
            replay_mode: self.replay.mode(),
            accepting: self.dispatcher.is_accepting(),
            lanes: CallType::all()
                .into_iter()
                .map(|call_type| LaneStatus {
                    call_type,
                    pending: self.dispatcher.queue_depth(call_type),
                    in_flight: self.dispatcher.in_flight(call_type),
                })
                .collect(),
            cache: self.cache.stats(),
            usage: self.ledger.totals(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop accepting work, drain for up to `grace`, flush the replay log.
    ///
    /// Requests still pending after the grace period are dropped without
    /// firing. Returns the session's usage totals.
    pub async fn shutdown(&self, grace: Duration) -> AugurResult<UsageTotals> {
        self.dispatcher.close();
        self.dispatcher.set_auto_drain(true);

        if tokio::time::timeout(grace, self.dispatcher.wait_idle()).await.is_err() {
            let dropped = self.dispatcher.discard_pending();
            tracing::warn!(
                dropped,
                in_flight = self.dispatcher.total_in_flight(),
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period elapsed with work outstanding"
            );
        }

        self.replay.flush()?;
        let totals = self.ledger.totals();
        tracing::info!(
            calls = totals.calls,
            total_tokens = totals.total_tokens(),
            cost_usd = totals.cost_usd,
            cache_hit_rate = self.cache.stats().hit_rate(),
            "Orchestrator shut down"
        );
        Ok(totals)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend)
            .field("provider_id", &self.provider_id)
            .field("tick", &self.tick())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptStep, ScriptedProvider};
    use augur_core::AugurError;

    fn config() -> AugurConfig {
        let mut config = AugurConfig::default();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 40;
        config
    }

    #[tokio::test]
    async fn test_awaitable_submission() {
        let provider = Arc::new(ScriptedProvider::new("mock").with_script([ScriptStep::Reply("Aye.".to_string())]));
        let orchestrator = Orchestrator::with_provider(config(), provider).unwrap();

        let pending = orchestrator
            .submit_awaitable(CallType::Conversation, "good morning", vec!["farmer-1".to_string()])
            .unwrap();
        let resolved = pending.wait().await.unwrap().unwrap();
        assert_eq!(resolved.content(), "Aye.");
        assert_eq!(resolved.source, ResponseSource::Provider);
        assert_eq!(orchestrator.usage().calls, 1);
    }

    #[tokio::test]
    async fn test_tick_is_captured_at_submission() {
        let orchestrator =
            Orchestrator::with_provider(config(), Arc::new(ScriptedProvider::new("mock"))).unwrap();
        orchestrator.set_tick(41);
        assert_eq!(orchestrator.advance_tick(), 42);

        let pending = orchestrator
            .submit_awaitable(CallType::Decision, "plant barley", Vec::new())
            .unwrap();
        assert_eq!(pending.handle.tick, 42);
        let resolved = pending.wait().await.unwrap().unwrap();
        assert_eq!(resolved.tick, 42);
    }

    #[tokio::test]
    async fn test_offline_provider_is_not_accounted() {
        let orchestrator = Orchestrator::with_provider(config(), Arc::new(OfflineProvider::new())).unwrap();
        let resolved = orchestrator
            .submit_awaitable(CallType::Narrative, "winter comes", Vec::new())
            .unwrap()
            .wait()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.source, ResponseSource::Provider);
        assert_eq!(orchestrator.usage(), UsageTotals::default());
        assert_eq!(orchestrator.cache_stats().entries, 0);
        assert_eq!(orchestrator.health().status, augur_core::HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_non_retryable_error_reaches_callback() {
        let provider = Arc::new(ScriptedProvider::new("mock").with_script([ScriptStep::Fail(
            augur_core::LlmError::ProviderError {
                provider: "mock".to_string(),
                status: 403,
                message: "forbidden".to_string(),
            },
        )]));
        let orchestrator = Orchestrator::with_provider(config(), provider).unwrap();
        let completion = orchestrator
            .submit_awaitable(CallType::Decision, "raise taxes", Vec::new())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(matches!(
            completion,
            Err(augur_core::LlmError::ProviderError { status: 403, .. })
        ));
        assert_eq!(orchestrator.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let orchestrator =
            Orchestrator::with_provider(config(), Arc::new(ScriptedProvider::new("mock"))).unwrap();
        orchestrator.submit_ambient_conversation("hello", |_| {}).unwrap();

        let totals = orchestrator.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(totals.calls, 1);
        assert!(matches!(
            orchestrator.submit_decision_interpretation("too late", |_| {}),
            Err(AugurError::ShutDown)
        ));
        assert!(!orchestrator.health().is_operational());
        assert!(!orchestrator.status().accepting);
    }

    #[tokio::test]
    async fn test_init_degrades_without_credential() {
        let mut config = config();
        config.provider.api_key = None;
        let orchestrator = Orchestrator::init(config).await.unwrap();
        assert_eq!(orchestrator.backend(), ProviderKind::Offline);
        assert_eq!(orchestrator.health().status, augur_core::HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let mut config = config();
        config.dispatch.auto_drain = false;
        let orchestrator =
            Orchestrator::with_provider(config, Arc::new(ScriptedProvider::new("mock"))).unwrap();
        orchestrator.submit_narrative_generation("a storm", |_| {}).unwrap();

        let status = orchestrator.status();
        assert_eq!(status.lanes.len(), 3);
        assert_eq!(status.lanes[1].call_type, CallType::Narrative);
        assert_eq!(status.lanes[1].pending, 1);
        assert_eq!(status.circuit, CircuitState::Closed);
        assert!(serde_json::to_string(&status).is_ok());
    }
}
