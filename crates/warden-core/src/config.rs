//! Warden configuration
//!
//! Loaded from TOML; every key is optional and falls back to its default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub hil: HilConfig,
    pub bus: BusConfig,
    pub registry: RegistryConfig,
    pub agents: AgentsConfig,
}

impl WardenConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With HIL section
    #[inline]
    #[must_use]
    pub fn with_hil(mut self, hil: HilConfig) -> Self {
        self.hil = hil;
        self
    }

    /// With bus history capacity
    #[inline]
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.bus.history_capacity = capacity;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.agents.retry = retry;
        self
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.hil.auto_approve_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "hil.auto_approve_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.bus.history_capacity == 0 {
            return Err(ConfigError::Invalid("bus.history_capacity must be > 0".into()));
        }
        let periods = [
            ("hil.timeout_ms", self.hil.timeout_ms),
            ("registry.health_poll_interval_ms", self.registry.health_poll_interval_ms),
            ("agents.health_check_interval_ms", self.agents.health_check_interval_ms),
            ("agents.monitoring_interval_ms", self.agents.monitoring_interval_ms),
            ("agents.approval_interval_ms", self.agents.approval_interval_ms),
            ("agents.security_interval_ms", self.agents.security_interval_ms),
        ];
        if let Some((key, _)) = periods.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be > 0")));
        }
        if self.agents.retry.max_retries == 0 {
            return Err(ConfigError::Invalid("agents.retry.max_retries must be >= 1".into()));
        }
        Ok(())
    }
}

/// HIL engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HilConfig {
    /// When false every request is decided by the threshold alone
    pub enabled: bool,
    pub auto_approve_threshold: f64,
    /// Upper bound on handler calls and review windows
    pub timeout_ms: u64,
    /// Review window of the default processing path
    pub review_delay_ms: u64,
    /// Decision keys that always escalate
    pub forced_decisions: Vec<String>,
}

impl HilConfig {
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn review_delay(&self) -> Duration {
        Duration::from_millis(self.review_delay_ms)
    }

    /// Whether `decision` bypasses the confidence shortcut
    #[must_use]
    pub fn is_forced(&self, decision: &str) -> bool {
        self.forced_decisions.iter().any(|d| d == decision)
    }

    /// With threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.auto_approve_threshold = threshold;
        self
    }

    /// With enabled flag
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// With review window
    #[inline]
    #[must_use]
    pub fn with_review_delay(mut self, delay: Duration) -> Self {
        self.review_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for HilConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_approve_threshold: 0.95,
            timeout_ms: 300_000,
            review_delay_ms: 2_000,
            forced_decisions: ["block", "escalate", "delete", "shutdown"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: warden_bus::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub health_poll_interval_ms: u64,
}

impl RegistryConfig {
    #[inline]
    #[must_use]
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_poll_interval_ms: 60_000,
        }
    }
}

/// Per-agent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub health_check_interval_ms: u64,
    pub monitoring_interval_ms: u64,
    pub approval_interval_ms: u64,
    pub security_interval_ms: u64,
    pub retry: RetryConfig,
}

impl AgentsConfig {
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    #[must_use]
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    #[must_use]
    pub fn approval_interval(&self) -> Duration {
        Duration::from_millis(self.approval_interval_ms)
    }

    #[must_use]
    pub fn security_interval(&self) -> Duration {
        Duration::from_millis(self.security_interval_ms)
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 60_000,
            monitoring_interval_ms: 30_000,
            approval_interval_ms: 10_000,
            security_interval_ms: 5_000,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy of the error-recovery agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    #[inline]
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            exponential_backoff: true,
            max_backoff_ms: 30_000,
        }
    }
}
