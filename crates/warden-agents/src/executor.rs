//! Ticket execution seam
//!
//! The approval agent hands each step of an approved ticket to a
//! [`TicketExecutor`]. [`LoggingExecutor`] is the built-in one: it dispatches
//! by ticket kind, logs, and reports the step as done.

use serde_json::{json, Value};
use warden_core::{AgentError, Ticket, TicketKind};

/// Rollback plans the built-in executor knows how to run
pub const KNOWN_ROLLBACK_PLANS: [&str; 4] = [
    "revert_performance_changes",
    "revert_error_handling",
    "disable_monitoring_changes",
    "revert_security_changes",
];

/// Split a proposed solution into steps on `,` `;` and newlines
#[must_use]
pub fn parse_steps(solution: &str) -> Vec<String> {
    solution
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Carries out approved tickets
#[async_trait::async_trait]
pub trait TicketExecutor: Send + Sync {
    /// Apply one step; an error stops the ticket and triggers rollback
    async fn execute_step(&self, ticket: &Ticket, step: &str) -> Result<Value, AgentError>;

    /// Undo a partially applied ticket
    async fn rollback(&self, ticket: &Ticket, plan: &str) -> Result<(), AgentError>;
}

/// Executor that only logs what it would do
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExecutor;

impl LoggingExecutor {
    fn classify(kind: TicketKind, step: &str) -> Option<&'static str> {
        let s = step.to_lowercase();
        match kind {
            TicketKind::AutomatedEvolution => Some("evolution"),
            TicketKind::SystemOptimization if s.contains("cache") => Some("cache_optimization"),
            TicketKind::SystemOptimization if s.contains("database") => Some("database_optimization"),
            TicketKind::SecurityResponse if s.contains("block") || s.contains("ip") => Some("ip_blocking"),
            TicketKind::SecurityResponse if s.contains("rate limit") => Some("rate_limiting"),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl TicketExecutor for LoggingExecutor {
    async fn execute_step(&self, ticket: &Ticket, step: &str) -> Result<Value, AgentError> {
        let kind = Self::classify(ticket.kind, step);
        tracing::info!(ticket = %ticket.id, ticket_kind = ?ticket.kind, step, action = ?kind, "executing ticket step");
        let mut out = json!({ "step": step, "status": "executed" });
        if let Some(kind) = kind {
            out["type"] = json!(kind);
        }
        Ok(out)
    }

    async fn rollback(&self, ticket: &Ticket, plan: &str) -> Result<(), AgentError> {
        if !KNOWN_ROLLBACK_PLANS.contains(&plan) {
            return Err(AgentError::Execution(format!("unknown rollback plan: {plan}")));
        }
        tracing::warn!(ticket = %ticket.id, plan, "rolling back ticket");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_split_on_every_delimiter() {
        let steps = parse_steps("Implement caching, add retry logic;\n tune pool ;;");
        assert_eq!(steps, vec!["Implement caching", "add retry logic", "tune pool"]);
        assert!(parse_steps("  ").is_empty());
    }

    #[tokio::test]
    async fn security_steps_are_classified() {
        let ticket = Ticket::new(TicketKind::SecurityResponse, "t", "");
        let out = LoggingExecutor.execute_step(&ticket, "Block IP 10.0.0.1").await.unwrap();
        assert_eq!(out["type"], "ip_blocking");

        let ticket = Ticket::new(TicketKind::Manual, "t", "");
        let out = LoggingExecutor.execute_step(&ticket, "anything").await.unwrap();
        assert!(out.get("type").is_none());
    }

    #[tokio::test]
    async fn unknown_rollback_plan_fails() {
        let ticket = Ticket::new(TicketKind::Manual, "t", "");
        assert!(LoggingExecutor.rollback(&ticket, "revert_error_handling").await.is_ok());
        assert!(LoggingExecutor.rollback(&ticket, "undo_everything").await.is_err());
    }
}
