//! Warden Agents
//!
//! The five domain agents built on [`warden_core::AgentRuntime`]:
//!
//! - [`HealthCheckAgent`]: worst-of aggregation over named checkers
//! - [`MonitoringAgent`]: threshold monitors, alerts and mitigations
//! - [`ErrorRecoveryAgent`]: classified retries with exponential backoff
//! - [`ApprovalAgent`]: rule-based ticket auto-approval with HIL fallback
//! - [`SecurityAgent`]: event scoring, rule actions and source blocking

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod approval;
pub mod error_recovery;
pub mod executor;
pub mod health_check;
pub mod monitoring;
pub mod security;

pub use approval::{
    ApprovalAgent, ApprovalPattern, ApprovedTicket, Approver, AutoApprovalRule, RejectedTicket,
    TicketError, TicketExecution, APPROVAL_AGENT,
};
pub use error_recovery::{
    ErrorRecord, ErrorRecoveryAgent, ErrorType, ErrorTypeStats, RecoveryOutcome,
    ERROR_RECOVERY_AGENT,
};
pub use executor::{LoggingExecutor, TicketExecutor};
pub use health_check::{
    CheckReading, CheckResult, CheckerLearning, HealthCheckAgent, HealthChecker, HealthSummary,
    ProbeChecker, SystemResourceChecker, HEALTH_CHECK_AGENT,
};
pub use monitoring::{Alert, AlertStatus, Mitigation, Monitor, MonitoringAgent, Threshold, MONITORING_AGENT};
pub use security::{AlertRule, BlockEntry, SecurityAgent, SecurityReport, SECURITY_AGENT};

/// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude
pub mod prelude {
    pub use crate::approval::ApprovalAgent;
    pub use crate::error_recovery::ErrorRecoveryAgent;
    pub use crate::executor::{LoggingExecutor, TicketExecutor};
    pub use crate::health_check::{HealthCheckAgent, HealthChecker, ProbeChecker, SystemResourceChecker};
    pub use crate::monitoring::{Monitor, MonitoringAgent};
    pub use crate::security::SecurityAgent;
}
