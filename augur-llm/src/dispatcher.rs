//! Priority lanes and the single point where callbacks fire
//!
//! Three lanes, one per [`CallType`], are served in strict priority order
//! (Decision > Narrative > Conversation) and FIFO within a lane. Each lane
//! has a concurrency cap and an obsolescence policy:
//!
//! | Lane         | Cap | Obsolescence                                    |
//! |--------------|-----|-------------------------------------------------|
//! | Decision     | 1   | none                                            |
//! | Narrative    | 1   | a new arrival supersedes every older request    |
//! | Conversation | 3   | pending beyond the cap drops the oldest entries |
//!
//! Submission never blocks: it enqueues and returns. `drain` moves ready
//! requests onto the runtime, where a [`RequestExecutor`] resolves them and
//! the dispatcher invokes the callback exactly once. Superseded and dropped
//! requests never invoke their callback.

use async_trait::async_trait;
use augur_core::{new_request_id, AugurError, CallType, LlmError, RequestId, ResolvedResponse, Tick};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;

/// What a caller eventually receives.
pub type Completion = Result<ResolvedResponse, LlmError>;

/// Completion callback, invoked at most once.
pub type CompletionCallback = Box<dyn FnOnce(Completion) + Send + 'static>;

// ============================================================================
// REQUEST
// ============================================================================

/// A queued generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub prompt: String,
    pub call_type: CallType,
    /// Derived from the call type
    pub priority: u8,
    /// Simulation tick at submission
    pub tick: Tick,
    pub enqueued_at: Instant,
    pub correlated_entities: Vec<String>,
}

impl Request {
    pub fn new(prompt: impl Into<String>, call_type: CallType, tick: Tick) -> Self {
        Self {
            id: new_request_id(),
            prompt: prompt.into(),
            call_type,
            priority: call_type.priority(),
            tick,
            enqueued_at: Instant::now(),
            correlated_entities: Vec::new(),
        }
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.correlated_entities = entities.into_iter().map(Into::into).collect();
        self
    }
}

/// Returned by `submit`; identifies the queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    pub id: RequestId,
    pub call_type: CallType,
    pub tick: Tick,
}

// ============================================================================
// LANE POLICY
// ============================================================================

/// How a lane treats older requests when a new one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obsolescence {
    /// Every request is served
    None,
    /// Only the newest request is served; older pending and in-flight
    /// requests are superseded
    KeepNewest,
    /// At most this many requests stay pending; the oldest excess are dropped
    DropOldestBeyond(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanePolicy {
    /// Maximum concurrent in-flight requests
    pub cap: usize,
    pub obsolescence: Obsolescence,
}

impl LanePolicy {
    pub fn for_call_type(call_type: CallType) -> Self {
        match call_type {
            CallType::Decision => Self {
                cap: 1,
                obsolescence: Obsolescence::None,
            },
            CallType::Narrative => Self {
                cap: 1,
                obsolescence: Obsolescence::KeepNewest,
            },
            CallType::Conversation => Self {
                cap: 3,
                obsolescence: Obsolescence::DropOldestBeyond(3),
            },
        }
    }
}

// ============================================================================
// EXECUTOR SEAM
// ============================================================================

/// Resolves one dispatched request. Implemented by the orchestrator pipeline.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &Request) -> Completion;
}

// ============================================================================
// DISPATCHER
// ============================================================================

struct PendingEntry {
    request: Request,
    callback: CompletionCallback,
}

struct Lane {
    policy: LanePolicy,
    pending: VecDeque<PendingEntry>,
    in_flight: HashSet<RequestId>,
    superseded: HashSet<RequestId>,
}

impl Lane {
    fn new(call_type: CallType) -> Self {
        Self {
            policy: LanePolicy::for_call_type(call_type),
            pending: VecDeque::new(),
            in_flight: HashSet::new(),
            superseded: HashSet::new(),
        }
    }

    fn has_ready_work(&self) -> bool {
        !self.pending.is_empty() && self.in_flight.len() < self.policy.cap
    }
}

fn lane_index(call_type: CallType) -> usize {
    match call_type {
        CallType::Decision => 0,
        CallType::Narrative => 1,
        CallType::Conversation => 2,
    }
}

/// Owns the three lanes and their in-flight bookkeeping.
pub struct Dispatcher {
    lanes: Mutex<[Lane; 3]>,
    executor: Arc<dyn RequestExecutor>,
    runtime: Handle,
    auto_drain: AtomicBool,
    accepting: AtomicBool,
    idle: Notify,
}

impl Dispatcher {
    /// Create a dispatcher that spawns work on `runtime`.
    ///
    /// With `auto_drain` every submission and completion drains immediately;
    /// otherwise the caller drives [`Dispatcher::drain`], e.g. once per tick.
    pub fn new(executor: Arc<dyn RequestExecutor>, runtime: Handle, auto_drain: bool) -> Arc<Self> {
        Arc::new(Self {
            lanes: Mutex::new(CallType::all().map(Lane::new)),
            executor,
            runtime,
            auto_drain: AtomicBool::new(auto_drain),
            accepting: AtomicBool::new(true),
            idle: Notify::new(),
        })
    }

    /// Create a dispatcher on the ambient tokio runtime.
    pub fn on_current_runtime(executor: Arc<dyn RequestExecutor>, auto_drain: bool) -> Result<Arc<Self>, AugurError> {
        let runtime = Handle::try_current().map_err(|e| AugurError::NoRuntime(e.to_string()))?;
        Ok(Self::new(executor, runtime, auto_drain))
    }

    fn lock(&self) -> MutexGuard<'_, [Lane; 3]> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn auto_drain(&self) -> bool {
        self.auto_drain.load(Ordering::SeqCst)
    }

    pub fn set_auto_drain(self: &Arc<Self>, enabled: bool) {
        self.auto_drain.store(enabled, Ordering::SeqCst);
        if enabled {
            self.drain();
        }
    }

    /// Enqueue a request. Never blocks on generation.
    pub fn submit(self: &Arc<Self>, request: Request, callback: CompletionCallback) -> Result<RequestHandle, AugurError> {
        if !self.is_accepting() {
            return Err(AugurError::ShutDown);
        }

        let handle = RequestHandle {
            id: request.id,
            call_type: request.call_type,
            tick: request.tick,
        };

        let discarded = {
            let mut lanes = self.lock();
            let lane = &mut lanes[lane_index(request.call_type)];
            let mut discarded = Vec::new();

            match lane.policy.obsolescence {
                Obsolescence::None => lane.pending.push_back(PendingEntry { request, callback }),
                Obsolescence::KeepNewest => {
                    discarded.extend(lane.pending.drain(..));
                    let in_flight: Vec<RequestId> = lane.in_flight.iter().copied().collect();
                    for id in in_flight {
                        if lane.superseded.insert(id) {
                            tracing::debug!(request_id = %id, call_type = %handle.call_type, "Superseded in-flight request");
                        }
                    }
                    lane.pending.push_back(PendingEntry { request, callback });
                }
                Obsolescence::DropOldestBeyond(limit) => {
                    lane.pending.push_back(PendingEntry { request, callback });
                    while lane.pending.len() > limit {
                        if let Some(oldest) = lane.pending.pop_front() {
                            discarded.push(oldest);
                        }
                    }
                }
            }
            discarded
        };

        tracing::debug!(request_id = %handle.id, call_type = %handle.call_type, tick = handle.tick, "Request enqueued");
        // Callbacks of discarded entries are dropped unfired, outside the lock.
        for entry in discarded {
            tracing::debug!(
                request_id = %entry.request.id,
                call_type = %entry.request.call_type,
                "Discarded pending request"
            );
        }

        if self.auto_drain() {
            self.drain();
        }
        Ok(handle)
    }

    /// Dispatch every ready request, highest lane first.
    ///
    /// Returns the ids dispatched, in dispatch order.
    pub fn drain(self: &Arc<Self>) -> Vec<RequestId> {
        let ready = {
            let mut lanes = self.lock();
            let mut ready = Vec::new();
            for lane in lanes.iter_mut() {
                while lane.has_ready_work() {
                    let Some(entry) = lane.pending.pop_front() else {
                        break;
                    };
                    lane.in_flight.insert(entry.request.id);
                    ready.push(entry);
                }
            }
            ready
        };

        let mut dispatched = Vec::with_capacity(ready.len());
        for PendingEntry { request, callback } in ready {
            tracing::debug!(
                request_id = %request.id,
                call_type = %request.call_type,
                queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
                "Dispatching request"
            );
            dispatched.push(request.id);
            let this = Arc::clone(self);
            self.runtime.spawn(async move {
                let completion = this.executor.execute(&request).await;
                this.complete(&request, callback, completion);
            });
        }
        dispatched
    }

    fn complete(self: &Arc<Self>, request: &Request, callback: CompletionCallback, completion: Completion) {
        let superseded = {
            let mut lanes = self.lock();
            let lane = &mut lanes[lane_index(request.call_type)];
            lane.in_flight.remove(&request.id);
            lane.superseded.remove(&request.id)
        };

        if superseded {
            tracing::debug!(request_id = %request.id, call_type = %request.call_type, "Discarded superseded result");
            drop(callback);
        } else {
            callback(completion);
        }

        if self.auto_drain() {
            self.drain();
        }
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Requests waiting in the lane for `call_type`.
    pub fn queue_depth(&self, call_type: CallType) -> usize {
        self.lock()[lane_index(call_type)].pending.len()
    }

    /// Requests of `call_type` currently executing.
    pub fn in_flight(&self, call_type: CallType) -> usize {
        self.lock()[lane_index(call_type)].in_flight.len()
    }

    pub fn total_pending(&self) -> usize {
        self.lock().iter().map(|lane| lane.pending.len()).sum()
    }

    pub fn total_in_flight(&self) -> usize {
        self.lock().iter().map(|lane| lane.in_flight.len()).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.lock()
            .iter()
            .all(|lane| lane.pending.is_empty() && lane.in_flight.is_empty())
    }

    /// Wait until nothing is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting submissions. Queued work is unaffected.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Drop every pending request unfired. Returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        let discarded: Vec<PendingEntry> = {
            let mut lanes = self.lock();
            lanes.iter_mut().flat_map(|lane| lane.pending.drain(..)).collect()
        };
        let count = discarded.len();
        drop(discarded);
        if self.is_idle() {
            self.idle.notify_waiters();
        }
        count
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.total_pending())
            .field("in_flight", &self.total_in_flight())
            .field("accepting", &self.is_accepting())
            .field("auto_drain", &self.auto_drain())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
