//! Warden Core
//!
//! The agent contract and the machinery every agent shares:
//! - [`Agent`] trait and lifecycle [`state_machine`]
//! - [`AgentRuntime`]: state, rolling metrics, bus and HIL wiring
//! - HIL request/response types and the [`HilBroker`] seam
//! - Typed payloads ([`Ticket`], [`SecurityEvent`])
//! - Injected collaborators ([`NotificationSender`], [`TicketSink`])
//! - [`Scheduler`] abstraction and [`launch`]
//! - [`WardenConfig`]
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::prelude::*;
//!
//! let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());
//! launch(agent.clone(), scheduler).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod hil;
pub mod recorder;
pub mod runtime;
pub mod scheduler;
pub mod state_machine;
pub mod types;

pub use agent::Agent;
pub use collaborators::{
    notify_best_effort, HealthProbe, LogNotifier, MetricSample, MetricsSource, Notification,
    NotificationKind, NotificationSender, ProbeReading, TicketSink,
};
pub use config::{AgentsConfig, BusConfig, HilConfig, RegistryConfig, RetryConfig, WardenConfig};
pub use context::{ContextPayload, ExecutionContext, RecoverableOperation, Trigger};
pub use domain::{
    Issue, IssueSeverity, RuleAction, SecurityEvent, SecurityEventKind, Severity, Ticket,
    TicketId, TicketKind, TicketStatus,
};
pub use error::{AgentError, ConfigError, HilError, NotificationError, StateMachineError};
pub use hil::{
    DecidedBy, HilAction, HilBroker, HilContext, HilDecision, HilHandler, HilOption, HilResponse,
    Priority, RiskTier,
};
pub use runtime::AgentRuntime;
pub use scheduler::{
    launch, reschedule, run_tick, ManualScheduler, PeriodicHandle, Scheduler, TickJob,
    TokioScheduler,
};
pub use types::{
    AgentCategory, AgentDescriptor, AgentMetrics, AgentResult, AgentState, AgentStatusSnapshot,
    AutonomyLevel, HealthStatus,
};

/// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude
pub mod prelude {
    pub use crate::agent::Agent;
    pub use crate::context::{ContextPayload, ExecutionContext};
    pub use crate::error::AgentError;
    pub use crate::hil::{HilBroker, HilContext, HilDecision, HilResponse};
    pub use crate::runtime::AgentRuntime;
    pub use crate::scheduler::{launch, Scheduler, TokioScheduler};
    pub use crate::types::{AgentDescriptor, AgentResult, AgentState, HealthStatus};
}
