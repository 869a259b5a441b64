//! Configuration loading for the AUGUR orchestrator.
//!
//! Precedence: environment variables, then the TOML file, then defaults.
//! Credentials are never printed; `Debug` redacts them.

use crate::{CallType, ConfigError, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PROVIDER: &str = "AUGUR_PROVIDER";
pub const ENV_ENDPOINT: &str = "AUGUR_ENDPOINT";
pub const ENV_API_KEY: &str = "AUGUR_API_KEY";
pub const ENV_MODEL: &str = "AUGUR_MODEL";
pub const ENV_REPLAY_MODE: &str = "AUGUR_REPLAY_MODE";
pub const ENV_REPLAY_PATH: &str = "AUGUR_REPLAY_PATH";

pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_REMOTE_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AugurConfig {
    pub provider: ProviderSettings,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
    pub cache: CacheConfig,
    pub replay: ReplayConfig,
    pub generation: GenerationConfig,
    pub ledger: LedgerConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Overrides the per-kind default endpoint
    pub endpoint: Option<String>,
    /// Overrides the per-kind default model
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub requests_per_minute: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Remote,
            endpoint: None,
            model: None,
            api_key: None,
            input_cost_per_1k: 0.0008,
            output_cost_per_1k: 0.004,
            requests_per_minute: 50,
        }
    }
}

impl ProviderSettings {
    pub fn endpoint(&self) -> &str {
        match (&self.endpoint, self.kind) {
            (Some(endpoint), _) => endpoint,
            (None, ProviderKind::Local) => DEFAULT_LOCAL_ENDPOINT,
            (None, _) => DEFAULT_REMOTE_ENDPOINT,
        }
    }

    pub fn model(&self) -> &str {
        match (&self.model, self.kind) {
            (Some(model), _) => model,
            (None, ProviderKind::Local) => DEFAULT_LOCAL_MODEL,
            (None, _) => DEFAULT_REMOTE_MODEL,
        }
    }

    /// Returns true if a non-blank API key is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint())
            .field("model", &self.model())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("input_cost_per_1k", &self.input_cost_per_1k)
            .field("output_cost_per_1k", &self.output_cost_per_1k)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

/// Per-lane timeout budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutConfig {
    pub decision_ms: u64,
    pub narrative_ms: u64,
    pub conversation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            decision_ms: 3_000,
            narrative_ms: 10_000,
            conversation_ms: 5_000,
        }
    }
}

/// Retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CircuitConfig {
    pub cooldown_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { cooldown_ms: 60_000 }
    }
}

impl CircuitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub decision_ttl_secs: u64,
    pub narrative_ttl_secs: u64,
    pub conversation_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            decision_ttl_secs: 30,
            narrative_ttl_secs: 30 * 60,
            conversation_ttl_secs: 20 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    #[default]
    Off,
    Record,
    Replay,
}

impl ReplayMode {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "record" => Some(Self::Record),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReplayConfig {
    pub mode: ReplayMode,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GenerationConfig {
    pub decision: GenerationParams,
    pub narrative: GenerationParams,
    pub conversation: GenerationParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            decision: GenerationParams {
                temperature: 0.2,
                max_tokens: 256,
            },
            narrative: GenerationParams {
                temperature: 0.8,
                max_tokens: 512,
            },
            conversation: GenerationParams {
                temperature: 0.9,
                max_tokens: 192,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LedgerConfig {
    /// Running cost (USD) at which a warning is logged
    pub budget_warning_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DispatchConfig {
    /// Drain on a background worker; when false the caller drives `drain()` each tick.
    pub auto_drain: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { auto_drain: true }
    }
}

impl AugurConfig {
    /// Load defaults, overlay the file (if given), then the environment, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay process environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(kind) = lookup(ENV_PROVIDER) {
            self.provider.kind =
                ProviderKind::from_db_str(&kind).map_err(|e| ConfigError::InvalidValue {
                    field: ENV_PROVIDER,
                    reason: e.to_string(),
                })?;
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.provider.endpoint = Some(endpoint);
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            self.provider.api_key = Some(api_key);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.provider.model = Some(model);
        }
        if let Some(mode) = lookup(ENV_REPLAY_MODE) {
            self.replay.mode =
                ReplayMode::from_db_str(&mode).ok_or_else(|| ConfigError::InvalidValue {
                    field: ENV_REPLAY_MODE,
                    reason: format!("expected off, record or replay, got '{}'", mode),
                })?;
        }
        if let Some(path) = lookup(ENV_REPLAY_PATH) {
            self.replay.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.decision_ms == 0 {
            return Err(invalid("timeouts.decision_ms", "must be > 0"));
        }
        if self.timeouts.narrative_ms == 0 {
            return Err(invalid("timeouts.narrative_ms", "must be > 0"));
        }
        if self.timeouts.conversation_ms == 0 {
            return Err(invalid("timeouts.conversation_ms", "must be > 0"));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms", "must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.max_delay_ms", "must be >= base_delay_ms"));
        }
        if self.circuit.cooldown_ms == 0 {
            return Err(invalid("circuit.cooldown_ms", "must be > 0"));
        }
        if self.cache.enabled {
            if self.cache.capacity == 0 {
                return Err(invalid("cache.capacity", "must be > 0 when caching is enabled"));
            }
            if self.cache.decision_ttl_secs == 0
                || self.cache.narrative_ttl_secs == 0
                || self.cache.conversation_ttl_secs == 0
            {
                return Err(invalid("cache.*_ttl_secs", "must be > 0"));
            }
        }
        if self.replay.mode != ReplayMode::Off && self.replay.path.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "replay.path",
            });
        }
        if self.provider.requests_per_minute == 0 {
            return Err(invalid("provider.requests_per_minute", "must be > 0"));
        }
        if self.provider.input_cost_per_1k < 0.0 || self.provider.output_cost_per_1k < 0.0 {
            return Err(invalid("provider.*_cost_per_1k", "must be >= 0"));
        }
        for call_type in CallType::all() {
            let params = self.generation_for(call_type);
            if !(0.0..=2.0).contains(&params.temperature) {
                return Err(invalid("generation.*.temperature", "must be within [0.0, 2.0]"));
            }
            if params.max_tokens == 0 {
                return Err(invalid("generation.*.max_tokens", "must be > 0"));
            }
        }
        if let Some(budget) = self.ledger.budget_warning_usd {
            if budget < 0.0 {
                return Err(invalid("ledger.budget_warning_usd", "must be >= 0"));
            }
        }
        Ok(())
    }

    pub fn timeout_for(&self, call_type: CallType) -> Duration {
        let ms = match call_type {
            CallType::Decision => self.timeouts.decision_ms,
            CallType::Narrative => self.timeouts.narrative_ms,
            CallType::Conversation => self.timeouts.conversation_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn ttl_for(&self, call_type: CallType) -> Duration {
        let secs = match call_type {
            CallType::Decision => self.cache.decision_ttl_secs,
            CallType::Narrative => self.cache.narrative_ttl_secs,
            CallType::Conversation => self.cache.conversation_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn generation_for(&self, call_type: CallType) -> &GenerationParams {
        match call_type {
            CallType::Decision => &self.generation.decision,
            CallType::Narrative => &self.generation.narrative,
            CallType::Conversation => &self.generation.conversation,
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AugurConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timeout_for(CallType::Decision), Duration::from_secs(3));
        assert_eq!(config.timeout_for(CallType::Narrative), Duration::from_secs(10));
        assert_eq!(config.timeout_for(CallType::Conversation), Duration::from_secs(5));
        assert!(config.ttl_for(CallType::Decision) < config.ttl_for(CallType::Narrative));
        assert!(config.ttl_for(CallType::Decision) < config.ttl_for(CallType::Conversation));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AugurConfig::from_toml_str(
            r#"
            [provider]
            kind = "local"

            [retry]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Local);
        assert_eq!(config.provider.endpoint(), DEFAULT_LOCAL_ENDPOINT);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.cache.capacity, 256);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = AugurConfig::from_toml_str(
            r#"
            [cache]
            capacity = 10
            flavour = "lru"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AugurConfig::from_toml_str(
            r#"
            [provider]
            kind = "local"
            api_key = "from-file"
            "#,
        )
        .unwrap();
        let vars = env(&[(ENV_PROVIDER, "remote"), (ENV_API_KEY, "from-env")]);
        config.apply_env_from(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Remote);
        assert_eq!(config.provider.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_blank_env_value_ignored() {
        let mut config = AugurConfig::default();
        config.provider.api_key = Some("from-file".to_string());
        let vars = env(&[(ENV_API_KEY, "  ")]);
        config.apply_env_from(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_invalid_env_provider_rejected() {
        let mut config = AugurConfig::default();
        let vars = env(&[(ENV_PROVIDER, "quantum")]);
        let err = config.apply_env_from(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: ENV_PROVIDER, .. }));
    }

    #[test]
    fn test_replay_requires_path() {
        let mut config = AugurConfig::default();
        config.replay.mode = ReplayMode::Replay;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { field: "replay.path" })
        ));
        config.replay.path = Some(PathBuf::from("trace.jsonl"));
        config.validate().unwrap();
    }

    #[test]
    fn test_max_delay_below_base_rejected() {
        let mut config = AugurConfig::default();
        config.retry.base_delay_ms = 500;
        config.retry.max_delay_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "retry.max_delay_ms", .. })
        ));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut settings = ProviderSettings::default();
        settings.api_key = Some("sk-secret-value".to_string());
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[circuit]\ncooldown_ms = 1500").unwrap();
        let config = AugurConfig::from_path(file.path()).unwrap();
        assert_eq!(config.circuit.cooldown(), Duration::from_millis(1500));
    }
}
