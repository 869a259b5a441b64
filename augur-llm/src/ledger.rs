//! Usage ledger
//!
//! Append-only token and cost accounting per completed provider call. Totals
//! are kept incrementally so reads are O(1). Clearing is an explicit operator
//! action and never happens automatically.

use augur_core::{CallType, GenerationResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One accounted call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub call_type: CallType,
    pub input_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Running totals over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.completion_tokens
    }

    fn add(&mut self, record: &UsageRecord) {
        self.calls += 1;
        self.input_tokens += record.input_tokens as u64;
        self.completion_tokens += record.completion_tokens as u64;
        self.cost_usd += record.cost_usd;
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: Vec<UsageRecord>,
    totals: UsageTotals,
    by_call_type: HashMap<CallType, UsageTotals>,
}

/// Thread-safe usage ledger with an optional budget warning.
#[derive(Debug, Default)]
pub struct UsageLedger {
    inner: RwLock<LedgerInner>,
    budget_warning_usd: Option<f64>,
    warned: AtomicBool,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a warning the first time cumulative cost reaches `budget_usd`.
    pub fn with_budget_warning(budget_usd: Option<f64>) -> Self {
        Self {
            budget_warning_usd: budget_usd,
            ..Self::default()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append the usage of one completed call and return it.
    pub fn record(&self, call_type: CallType, response: &GenerationResponse) -> UsageRecord {
        let record = UsageRecord {
            call_type,
            input_tokens: response.input_tokens,
            completion_tokens: response.completion_tokens,
            cost_usd: response.cost_usd,
            recorded_at: Utc::now(),
        };

        let total_cost = {
            let mut inner = self.write();
            inner.totals.add(&record);
            inner.by_call_type.entry(call_type).or_default().add(&record);
            inner.records.push(record.clone());
            inner.totals.cost_usd
        };

        tracing::debug!(
            call_type = %call_type,
            input_tokens = record.input_tokens,
            completion_tokens = record.completion_tokens,
            cost_usd = record.cost_usd,
            total_cost_usd = total_cost,
            "Recorded usage"
        );

        if let Some(budget) = self.budget_warning_usd {
            if total_cost >= budget && !self.warned.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    budget_usd = budget,
                    total_cost_usd = total_cost,
                    "Usage budget threshold reached"
                );
            }
        }

        record
    }

    pub fn totals(&self) -> UsageTotals {
        self.read().totals.clone()
    }

    pub fn totals_for(&self, call_type: CallType) -> UsageTotals {
        self.read().by_call_type.get(&call_type).cloned().unwrap_or_default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether cumulative cost has reached the budget threshold.
    pub fn over_budget(&self) -> bool {
        match self.budget_warning_usd {
            Some(budget) => self.read().totals.cost_usd >= budget,
            None => false,
        }
    }

    /// Drop all records and totals, e.g. at the start of a session.
    pub fn clear(&self) {
        *self.write() = LedgerInner::default();
        self.warned.store(false, Ordering::SeqCst);
        tracing::info!("Usage ledger cleared");
    }
}
