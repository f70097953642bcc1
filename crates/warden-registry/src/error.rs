//! Registry error types

use warden_core::AgentError;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Name already registered
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    /// No agent with this name
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// `initialize` failed; the agent was not registered
    #[error("agent {name} failed to initialize: {source}")]
    Initialization {
        name: String,
        #[source]
        source: AgentError,
    },

    /// A lifecycle verb failed
    #[error("agent {name}: {source}")]
    Agent {
        name: String,
        #[source]
        source: AgentError,
    },
}
