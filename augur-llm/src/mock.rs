//! Scripted provider for tests and local development
//!
//! `ScriptedProvider` replays a queue of canned outcomes, one per call, and
//! records every invocation so tests can assert on call counts and timing.
//! Once the script is exhausted it echoes the prompt back.

use crate::GenerationProvider;
use async_trait::async_trait;
use augur_core::{CallType, GenerationRequest, GenerationResponse, LlmError, ProviderKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Cost per word charged by the scripted provider.
const COST_PER_TOKEN: f64 = 0.00001;

/// One canned outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Succeed immediately with this text
    Reply(String),
    /// Fail immediately with this error
    Fail(LlmError),
    /// Sleep, then echo the prompt (use with a shorter lane timeout)
    Stall(Duration),
    /// Sleep, then succeed with this text
    ReplyAfter(Duration, String),
}

/// A recorded invocation.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub prompt: String,
    pub call_type: CallType,
    pub at: Instant,
}

/// Provider driven by a script of outcomes.
pub struct ScriptedProvider {
    id: String,
    kind: ProviderKind,
    configured: AtomicBool,
    available: AtomicBool,
    script: Mutex<VecDeque<ScriptStep>>,
    calls: Mutex<Vec<ProviderCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    /// Create a remote-kind provider with an empty script.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Remote,
            configured: AtomicBool::new(true),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_script(self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        lock(&self.script).extend(steps);
        self
    }

    /// Queue `count` retryable timeouts.
    pub fn failing_with_timeouts(self, count: usize) -> Self {
        let provider = self.id.clone();
        self.with_script((0..count).map(|_| {
            ScriptStep::Fail(LlmError::Timeout {
                provider: provider.clone(),
                after_ms: 0,
            })
        }))
    }

    pub fn push(&self, step: ScriptStep) {
        lock(&self.script).push_back(step);
    }

    /// An unconfigured provider is rejected before any call is made.
    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    /// An unreachable provider fails every call with a network error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn remaining_steps(&self) -> usize {
        lock(&self.script).len()
    }

    fn reply(content: impl Into<String>, request: &GenerationRequest, started: Instant) -> GenerationResponse {
        let content = content.into();
        let input_tokens = request.prompt.split_whitespace().count() as u32;
        let completion_tokens = content.split_whitespace().count() as u32;
        let cost = (input_tokens + completion_tokens) as f64 * COST_PER_TOKEN;
        GenerationResponse::success(
            content,
            input_tokens,
            completion_tokens,
            cost,
            started.elapsed().as_millis() as u64,
        )
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let started = Instant::now();
        lock(&self.calls).push(ProviderCall {
            prompt: request.prompt.clone(),
            call_type: request.call_type,
            at: started,
        });

        if !self.available.load(Ordering::SeqCst) {
            return Err(LlmError::NetworkFailure {
                provider: self.id.clone(),
                message: "connection refused".to_string(),
            });
        }

        let step = lock(&self.script).pop_front();
        match step {
            Some(ScriptStep::Reply(text)) => Ok(Self::reply(text, request, started)),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::reply(format!("echo: {}", request.prompt), request, started))
            }
            Some(ScriptStep::ReplyAfter(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::reply(text, request, started))
            }
            None => Ok(Self::reply(format!("echo: {}", request.prompt), request, started)),
        }
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("remaining_steps", &self.remaining_steps())
            .field("calls", &self.call_count())
            .finish()
    }
}
