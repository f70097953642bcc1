//! Error types for Warden Core
//!
//! Covers:
//! - Agent execution and lifecycle failures
//! - Illegal state transitions
//! - HIL request resolution
//! - Notification delivery
//! - Configuration loading and validation

use crate::types::AgentState;
use std::path::PathBuf;

/// Main agent error type
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Context did not carry what the agent needs
    #[error("invalid execution context: {0}")]
    InvalidContext(String),

    /// Execution of the agent's work failed
    #[error("execution failed: {0}")]
    Execution(String),

    /// Initialization hook failed
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Lifecycle transition rejected
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// No HIL broker attached to the agent
    #[error("no HIL broker attached to agent {agent}")]
    HilUnavailable { agent: String },

    /// An injected collaborator failed
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// Operation timed out
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl AgentError {
    /// Whether retrying the same work could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Execution(_) | AgentError::Collaborator(_) | AgentError::Timeout { .. }
        )
    }
}

/// Lifecycle state machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: AgentState, to: AgentState },
}

/// HIL engine errors
#[derive(Debug, thiserror::Error)]
pub enum HilError {
    /// No pending request with this ID
    #[error("unknown HIL request: {0}")]
    UnknownRequest(uuid::Uuid),

    /// Agent-specific handler failed
    #[error("HIL handler failed: {0}")]
    HandlerFailed(String),

    /// No handler registered for the agent
    #[error("no HIL handler registered for agent {0}")]
    NoHandler(String),
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Channel refused or failed to deliver
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parsed but are out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result alias for agent operations
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AgentError::Execution("boom".into()).is_retryable());
        assert!(AgentError::Timeout { duration_ms: 10 }.is_retryable());
        assert!(!AgentError::InvalidContext("missing".into()).is_retryable());
        assert!(!AgentError::HilUnavailable { agent: "a".into() }.is_retryable());
    }

    #[test]
    fn illegal_transition_message_names_states() {
        let err = StateMachineError::IllegalTransition {
            from: AgentState::Paused,
            to: AgentState::Error,
        };
        assert_eq!(err.to_string(), "illegal state transition: paused -> error");
    }
}
