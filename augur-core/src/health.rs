//! Health reporting for the orchestrator.
//!
//! The orchestrator reports Healthy while calls reach the configured backend,
//! Degraded while text comes from the offline backend (circuit open or no
//! usable backend), and Unhealthy once it has been shut down.

use crate::{CircuitState, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Calls reach the configured backend
    Healthy,
    /// Serving offline text; quality degraded, availability intact
    Degraded,
    /// Not accepting work
    Unhealthy,
}

/// Health check result for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    /// Backend currently answering live calls
    pub backend: ProviderKind,
    pub circuit: CircuitState,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HealthCheck {
    /// Derive the status from the backend in use and the circuit state.
    pub fn evaluate(component: impl Into<String>, backend: ProviderKind, circuit: CircuitState) -> Self {
        let (status, message) = match (backend, circuit) {
            (_, CircuitState::Open) => (
                HealthStatus::Degraded,
                Some("circuit open; serving offline responses".to_string()),
            ),
            (ProviderKind::Offline, CircuitState::Closed) => (
                HealthStatus::Degraded,
                Some("running on the offline backend".to_string()),
            ),
            (_, CircuitState::Closed) => (HealthStatus::Healthy, None),
        };
        Self {
            status,
            component: component.into(),
            message,
            backend,
            circuit,
            metadata: HashMap::new(),
        }
    }

    /// A component that no longer accepts work.
    pub fn unhealthy(
        component: impl Into<String>,
        backend: ProviderKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            backend,
            circuit: CircuitState::Closed,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_operational(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_circuit_on_remote_is_healthy() {
        let check = HealthCheck::evaluate("augur", ProviderKind::Remote, CircuitState::Closed);
        assert_eq!(check.status, HealthStatus::Healthy);
        assert!(check.message.is_none());
    }

    #[test]
    fn test_open_circuit_is_degraded() {
        let check = HealthCheck::evaluate("augur", ProviderKind::Local, CircuitState::Open);
        assert_eq!(check.status, HealthStatus::Degraded);
        assert!(check.is_operational());
    }

    #[test]
    fn test_offline_backend_is_degraded() {
        let check = HealthCheck::evaluate("augur", ProviderKind::Offline, CircuitState::Closed)
            .with_metadata("queued", serde_json::json!(3));
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(check.metadata["queued"], serde_json::json!(3));
    }

    #[test]
    fn test_unhealthy_is_not_operational() {
        let check = HealthCheck::unhealthy("augur", ProviderKind::Remote, "shut down");
        assert!(!check.is_operational());
    }
}
