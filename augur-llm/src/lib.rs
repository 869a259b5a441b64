//! AUGUR LLM - Orchestration & Resilience Layer
//!
//! Brokers text generation for a real-time simulation that must never block
//! on a provider call. Requests are queued into three priority lanes,
//! answered from a content-addressed cache where possible, sent to the
//! configured backend with retry and backoff otherwise, and served by a
//! deterministic offline backend while the circuit breaker is open.
//!
//! The [`GenerationProvider`] trait is the only seam a backend implements.

use async_trait::async_trait;
use augur_core::{GenerationRequest, GenerationResponse, LlmError, ProviderKind};

pub mod cache;
pub mod dispatcher;
pub mod ledger;
pub mod mock;
pub mod orchestrator;
pub mod providers;
pub mod replay;
pub mod resilience;

pub use cache::{CacheStats, ResponseCache};
pub use dispatcher::{
    Completion, CompletionCallback, Dispatcher, LanePolicy, Obsolescence, Request, RequestExecutor,
    RequestHandle,
};
pub use ledger::{UsageLedger, UsageRecord, UsageTotals};
pub use mock::{ProviderCall, ScriptStep, ScriptedProvider};
pub use orchestrator::{LaneStatus, Orchestrator, OrchestratorStatus, PendingResponse};
pub use providers::{Backend, LocalProvider, OfflineProvider, RemoteProvider};
pub use replay::{ReplayLog, ReplayRecord};
pub use resilience::{CircuitBreaker, ExecutionOutcome, ResilienceController, RetryPolicy};

// ============================================================================
// GENERATION PROVIDER TRAIT
// ============================================================================

/// Trait for text generation backends.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct MyBackend { /* ... */ }
///
/// #[async_trait]
/// impl GenerationProvider for MyBackend {
///     async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
///         // Call the model
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Identifier used in logs and error messages (e.g. "anthropic").
    fn provider_id(&self) -> &str;

    /// Backend family of this provider.
    fn kind(&self) -> ProviderKind;

    /// Whether the backend has what it needs to be called at all: a
    /// credential for remote backends, an endpoint and model for local ones.
    ///
    /// An unconfigured backend fails fast with `ProviderUnavailable`; a
    /// configured one that cannot be reached fails through `generate` with a
    /// retryable error instead.
    fn is_configured(&self) -> bool {
        true
    }

    /// Whether the backend can currently accept calls.
    ///
    /// Remote backends report whether a credential is configured, local
    /// backends whether their endpoint answers.
    async fn is_available(&self) -> bool;

    /// Generate text for a single request.
    ///
    /// # Returns
    /// * `Ok(GenerationResponse)` - A successful response with usage
    /// * `Err(LlmError)` - A failure classified at the backend boundary
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError>;
}
