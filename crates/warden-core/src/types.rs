//! Core types shared by every agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Functional grouping of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Monitoring,
    Decision,
    Remediation,
    Processing,
    Security,
}

/// How much an agent may do without a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Acts alone
    Full,
    /// Acts alone below a risk threshold, escalates above it
    Partial,
    /// Every consequential action goes through HIL
    HilRequired,
}

/// Static identity of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique registry key
    pub name: String,
    /// Category
    pub category: AgentCategory,
    /// Autonomy level
    pub autonomy: AutonomyLevel,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

impl AgentDescriptor {
    /// Create new descriptor
    #[must_use]
    pub fn new(name: impl Into<String>, category: AgentCategory, autonomy: AutonomyLevel) -> Self {
        Self {
            name: name.into(),
            category,
            autonomy,
            description: String::new(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Error,
    Stopped,
}

impl AgentState {
    /// Every state
    pub const ALL: [AgentState; 5] = [
        AgentState::Idle,
        AgentState::Running,
        AgentState::Paused,
        AgentState::Error,
        AgentState::Stopped,
    ];

    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Error => "error",
            AgentState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health classification, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Worst status in the set; `Healthy` when empty
    #[must_use]
    pub fn worst_of(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
    }

    /// Health implied by a lifecycle state
    #[must_use]
    pub const fn from_state(state: AgentState) -> HealthStatus {
        match state {
            AgentState::Error => HealthStatus::Unhealthy,
            AgentState::Running => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Performance counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Completed executions (success or failure)
    pub total_executions: u64,
    /// Success fraction over the rolling window, in [0, 1]
    pub success_rate: f64,
    /// Mean execution time over the rolling window
    pub average_execution_time_ms: f64,
    /// Time of the most recent execution
    pub last_execution: Option<DateTime<Utc>>,
    /// Failed executions and isolated internal errors
    pub errors: u64,
    /// Non-fatal anomalies
    pub warnings: u64,
    /// HIL requests issued
    pub hil_requests: u64,
    /// Decisions taken without a human
    pub auto_decisions: u64,
}

/// Point-in-time status of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub name: String,
    pub state: AgentState,
    pub health: HealthStatus,
    pub metrics: AgentMetrics,
    pub last_error: Option<String>,
    pub last_execution: Option<DateTime<Utc>>,
}

impl AgentStatusSnapshot {
    /// Synthetic entry for an agent whose status could not be read
    #[must_use]
    pub fn unreachable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AgentState::Error,
            health: HealthStatus::Unhealthy,
            metrics: AgentMetrics::default(),
            last_error: Some(reason.into()),
            last_execution: None,
        }
    }
}

/// Outcome of one execution
///
/// Agents build this with [`AgentResult::ok`] / [`AgentResult::failed`]; the
/// runtime stamps `execution_time_ms` and `metrics` when the cycle finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub execution_time_ms: u64,
    pub data: serde_json::Value,
    pub error: Option<String>,
    pub requires_hil: bool,
    pub metrics: AgentMetrics,
}

impl AgentResult {
    /// Successful result carrying `data`
    #[must_use]
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            execution_time_ms: 0,
            data,
            error: None,
            requires_hil: false,
            metrics: AgentMetrics::default(),
        }
    }

    /// Failed result
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            execution_time_ms: 0,
            data: serde_json::Value::Null,
            error: Some(error.into()),
            requires_hil: false,
            metrics: AgentMetrics::default(),
        }
    }

    /// With data
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Mark as needing a human
    #[inline]
    #[must_use]
    pub fn with_requires_hil(mut self, requires_hil: bool) -> Self {
        self.requires_hil = requires_hil;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_of_picks_most_severe() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::worst_of([Healthy, Degraded, Healthy]), Degraded);
        assert_eq!(HealthStatus::worst_of([Healthy, Unhealthy, Degraded]), Unhealthy);
        assert_eq!(HealthStatus::worst_of([]), Healthy);
    }

    #[test]
    fn health_from_state() {
        assert_eq!(HealthStatus::from_state(AgentState::Error), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_state(AgentState::Running), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_state(AgentState::Paused), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_state(AgentState::Idle), HealthStatus::Degraded);
    }

    #[test]
    fn unreachable_snapshot_is_unhealthy() {
        let snap = AgentStatusSnapshot::unreachable("x", "panicked");
        assert_eq!(snap.health, HealthStatus::Unhealthy);
        assert_eq!(snap.last_error.as_deref(), Some("panicked"));
    }
}
