//! Event types carried by the bus
//!
//! Every event names the agent it concerns and a fixed [`EventKind`]. The
//! optional `data` payload is free-form JSON; `error` carries a failure message
//! for the `*.failed` / `agent.error` kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique event identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub Ulid);

impl EventId {
    /// Generate new event ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named lifecycle and decision events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "agent.registered")]
    AgentRegistered,
    #[serde(rename = "agent.unregistered")]
    AgentUnregistered,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.stopped")]
    AgentStopped,
    #[serde(rename = "agent.error")]
    AgentError,
    #[serde(rename = "agent.execution.start")]
    ExecutionStart,
    #[serde(rename = "agent.execution.complete")]
    ExecutionComplete,
    #[serde(rename = "agent.execution.failed")]
    ExecutionFailed,
    #[serde(rename = "agent.hil.requested")]
    HilRequested,
    #[serde(rename = "agent.hil.completed")]
    HilCompleted,
    #[serde(rename = "agent.strategy.adapted")]
    StrategyAdapted,
    /// Domain alert raised by a monitoring-style agent
    #[serde(rename = "agent.alert")]
    AlertRaised,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 12] = [
        EventKind::AgentRegistered,
        EventKind::AgentUnregistered,
        EventKind::AgentStarted,
        EventKind::AgentStopped,
        EventKind::AgentError,
        EventKind::ExecutionStart,
        EventKind::ExecutionComplete,
        EventKind::ExecutionFailed,
        EventKind::HilRequested,
        EventKind::HilCompleted,
        EventKind::StrategyAdapted,
        EventKind::AlertRaised,
    ];

    /// Wire name of the event
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentRegistered => "agent.registered",
            EventKind::AgentUnregistered => "agent.unregistered",
            EventKind::AgentStarted => "agent.started",
            EventKind::AgentStopped => "agent.stopped",
            EventKind::AgentError => "agent.error",
            EventKind::ExecutionStart => "agent.execution.start",
            EventKind::ExecutionComplete => "agent.execution.complete",
            EventKind::ExecutionFailed => "agent.execution.failed",
            EventKind::HilRequested => "agent.hil.requested",
            EventKind::HilCompleted => "agent.hil.completed",
            EventKind::StrategyAdapted => "agent.strategy.adapted",
            EventKind::AlertRaised => "agent.alert",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single emitted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event ID
    pub id: EventId,
    /// Event kind
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Name of the agent the event concerns
    pub agent: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Optional payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Optional error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentEvent {
    /// Create new event stamped with the current time
    #[must_use]
    pub fn new(kind: EventKind, agent: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            agent: agent.into(),
            timestamp: Utc::now(),
            data: None,
            error: None,
        }
    }

    /// With payload
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// With error message
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
