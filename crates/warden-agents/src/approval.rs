//! Approval agent
//!
//! Tickets wait in a pending queue (submission order). Each cycle tests every
//! pending ticket against an ordered list of [`AutoApprovalRule`]s; the first
//! match approves it without a human. Anything else is escalated through the
//! HIL broker with `approve` / `reject` options.
//!
//! Approved tickets are executed step by step through a [`TicketExecutor`]. A
//! failing step stops the ticket and runs the matched rule's rollback plan.

use crate::executor::{parse_steps, TicketExecutor};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use warden_core::{
    Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult, AgentRuntime, AutonomyLevel,
    ContextPayload, DecidedBy, ExecutionContext, HilAction, HilContext, HilDecision, HilOption,
    HilResponse, IssueSeverity, Priority, RiskTier, Ticket, TicketId, TicketKind, TicketSink,
    TicketStatus, Trigger,
};

/// Registered name
pub const APPROVAL_AGENT: &str = "approval";

/// HIL decision key for ticket escalations
pub const TICKET_APPROVAL_DECISION: &str = "ticket_approval";

const OUTCOME_HISTORY_LIMIT: usize = 100;

const LOW_RISK_INDICATORS: [&str; 7] = [
    "caching",
    "optimization",
    "monitoring",
    "logging",
    "timeout",
    "retry",
    "circuit breaker",
];

const HIGH_RISK_INDICATORS: [&str; 6] = [
    "database schema",
    "authentication",
    "authorization",
    "encryption",
    "security policy",
    "user data",
];

const HARDENING_INDICATORS: [&str; 6] = [
    "rate limiting",
    "captcha",
    "audit logging",
    "input validation",
    "monitoring",
    "alerting",
];

const RISKY_SECURITY_INDICATORS: [&str; 4] = [
    "authentication bypass",
    "permission change",
    "data access",
    "encryption key",
];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Solution mentions a low-risk technique and nothing high-risk
#[must_use]
pub fn is_low_risk_change(solution: &str) -> bool {
    let s = solution.to_lowercase();
    contains_any(&s, &LOW_RISK_INDICATORS) && !contains_any(&s, &HIGH_RISK_INDICATORS)
}

/// Solution only hardens, never loosens, security
#[must_use]
pub fn is_security_hardening_only(solution: &str) -> bool {
    let s = solution.to_lowercase();
    contains_any(&s, &HARDENING_INDICATORS) && !contains_any(&s, &RISKY_SECURITY_INDICATORS)
}

type TicketPredicate = Arc<dyn Fn(&Ticket) -> bool + Send + Sync>;

/// Predicate plus the confidence and rollback plan it approves with
#[derive(Clone)]
pub struct AutoApprovalRule {
    pub id: String,
    pub confidence: f64,
    pub max_execution_time: Duration,
    pub rollback_plan: String,
    condition: TicketPredicate,
}

impl std::fmt::Debug for AutoApprovalRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoApprovalRule")
            .field("id", &self.id)
            .field("confidence", &self.confidence)
            .field("rollback_plan", &self.rollback_plan)
            .finish_non_exhaustive()
    }
}

impl AutoApprovalRule {
    pub fn new<F>(
        id: impl Into<String>,
        confidence: f64,
        max_execution_time: Duration,
        rollback_plan: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&Ticket) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            confidence,
            max_execution_time,
            rollback_plan: rollback_plan.into(),
            condition: Arc::new(condition),
        }
    }

    #[inline]
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        (self.condition)(ticket)
    }

    /// The four built-in rules, in evaluation order
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        let evolution = |t: &Ticket| t.kind == TicketKind::AutomatedEvolution;
        let warning = |t: &Ticket| t.issue_severity() == Some(IssueSeverity::Warning);
        vec![
            Self::new(
                "performance_optimization",
                0.85,
                Duration::from_secs(300),
                "revert_performance_changes",
                move |t| {
                    evolution(t)
                        && t.issue_monitor() == Some("performance")
                        && warning(t)
                        && is_low_risk_change(&t.proposed_solution)
                },
            ),
            Self::new(
                "error_handling",
                0.90,
                Duration::from_secs(180),
                "revert_error_handling",
                move |t| {
                    let s = t.proposed_solution.to_lowercase();
                    evolution(t)
                        && t.issue_monitor() == Some("error")
                        && s.contains("error handling")
                        && !s.contains("security")
                },
            ),
            Self::new(
                "monitoring_enhancement",
                0.95,
                Duration::from_secs(60),
                "disable_monitoring_changes",
                move |t| {
                    let s = t.proposed_solution.to_lowercase();
                    evolution(t) && s.contains("monitoring") && !s.contains("code") && !s.contains("logic")
                },
            ),
            Self::new(
                "security_hardening",
                0.75,
                Duration::from_secs(120),
                "revert_security_changes",
                move |t| {
                    evolution(t)
                        && t.issue_monitor() == Some("security")
                        && warning(t)
                        && is_security_hardening_only(&t.proposed_solution)
                },
            ),
        ]
    }
}

/// Who approved a ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Approver {
    Rule { rule: String, confidence: f64 },
    Hil { decided_by: DecidedBy },
    Operator,
}

/// Result of carrying out an approved ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TicketExecution {
    Executed {
        steps: Vec<serde_json::Value>,
    },
    RolledBack {
        failed_step: String,
        error: String,
        plan: String,
    },
    RollbackFailed {
        failed_step: String,
        error: String,
        plan: Option<String>,
        rollback_error: Option<String>,
    },
}

impl TicketExecution {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self, TicketExecution::Executed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovedTicket {
    pub ticket: Ticket,
    pub approver: Approver,
    pub reason: String,
    pub approved_at: DateTime<Utc>,
    pub execution: TicketExecution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedTicket {
    pub ticket: Ticket,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Per-kind approval history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApprovalPattern {
    pub approved: u64,
    pub rejected: u64,
    pub auto_approved: u64,
    /// Execution outcomes, newest last
    pub outcomes: VecDeque<bool>,
}

/// Failures of out-of-band ticket decisions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    /// Ticket is not in the pending queue
    #[error("ticket not pending: {0}")]
    NotPending(TicketId),
}

#[derive(Debug, Default)]
struct TicketStore {
    pending: IndexMap<TicketId, Ticket>,
    approved: IndexMap<TicketId, ApprovedTicket>,
    rejected: IndexMap<TicketId, RejectedTicket>,
    patterns: HashMap<TicketKind, ApprovalPattern>,
}

#[derive(Debug, Default, Serialize)]
struct CycleReport {
    processed: u64,
    auto_approved: u64,
    hil_requested: u64,
    approved: u64,
    rejected: u64,
    awaiting_reviewer: u64,
}

/// Approves or escalates pending tickets
pub struct ApprovalAgent {
    runtime: AgentRuntime,
    period: Duration,
    rules: Vec<AutoApprovalRule>,
    executor: Arc<dyn TicketExecutor>,
    store: Mutex<TicketStore>,
}

impl std::fmt::Debug for ApprovalAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.lock();
        f.debug_struct("ApprovalAgent")
            .field("runtime", &self.runtime)
            .field("rules", &self.rules.len())
            .field("pending", &store.pending.len())
            .finish_non_exhaustive()
    }
}

impl ApprovalAgent {
    /// Agent with the built-in rules
    #[must_use]
    pub fn new(period: Duration, executor: Arc<dyn TicketExecutor>) -> Self {
        let descriptor = AgentDescriptor::new(APPROVAL_AGENT, AgentCategory::Decision, AutonomyLevel::Partial)
            .with_description("Auto-approves low-risk tickets and escalates the rest");
        Self {
            runtime: AgentRuntime::new(descriptor),
            period,
            rules: AutoApprovalRule::defaults(),
            executor,
            store: Mutex::new(TicketStore::default()),
        }
    }

    /// Append a rule after the existing ones
    #[must_use]
    pub fn with_rule(mut self, rule: AutoApprovalRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rule ids in evaluation order
    #[must_use]
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    /// First rule matching `ticket`
    #[must_use]
    pub fn check_auto_approval(&self, ticket: &Ticket) -> Option<&AutoApprovalRule> {
        self.rules.iter().find(|r| r.matches(ticket))
    }

    #[must_use]
    pub fn pending_tickets(&self) -> Vec<Ticket> {
        self.store.lock().pending.values().cloned().collect()
    }

    #[must_use]
    pub fn approved_tickets(&self) -> Vec<ApprovedTicket> {
        self.store.lock().approved.values().cloned().collect()
    }

    #[must_use]
    pub fn rejected_tickets(&self) -> Vec<RejectedTicket> {
        self.store.lock().rejected.values().cloned().collect()
    }

    #[must_use]
    pub fn approval_patterns(&self) -> HashMap<TicketKind, ApprovalPattern> {
        self.store.lock().patterns.clone()
    }

    /// Operator approval of a pending ticket; runs it immediately
    pub async fn approve_ticket(
        &self,
        id: TicketId,
        reason: impl Into<String>,
    ) -> Result<TicketExecution, TicketError> {
        let ticket = self.take_pending(id)?;
        Ok(self.approve(ticket, Approver::Operator, reason.into()).await)
    }

    /// Operator rejection of a pending ticket
    pub fn reject_ticket(&self, id: TicketId, reason: impl Into<String>) -> Result<(), TicketError> {
        let ticket = self.take_pending(id)?;
        self.reject(ticket, reason.into());
        Ok(())
    }

    fn take_pending(&self, id: TicketId) -> Result<Ticket, TicketError> {
        self.store
            .lock()
            .pending
            .shift_remove(&id)
            .ok_or(TicketError::NotPending(id))
    }

    async fn approve(&self, mut ticket: Ticket, approver: Approver, reason: String) -> TicketExecution {
        ticket.status = TicketStatus::Approved;
        tracing::info!(ticket = %ticket.id, approver = ?approver, reason = %reason, "ticket approved");

        let execution = self.run_ticket(&ticket).await;
        if !execution.succeeded() {
            self.runtime.record_error();
        }

        let mut store = self.store.lock();
        let pattern = store.patterns.entry(ticket.kind).or_default();
        if matches!(approver, Approver::Rule { .. }) {
            pattern.auto_approved += 1;
        } else {
            pattern.approved += 1;
        }
        pattern.outcomes.push_back(execution.succeeded());
        while pattern.outcomes.len() > OUTCOME_HISTORY_LIMIT {
            pattern.outcomes.pop_front();
        }
        store.approved.insert(
            ticket.id,
            ApprovedTicket {
                ticket,
                approver,
                reason,
                approved_at: Utc::now(),
                execution: execution.clone(),
            },
        );
        execution
    }

    fn reject(&self, mut ticket: Ticket, reason: String) {
        ticket.status = TicketStatus::Rejected;
        tracing::info!(ticket = %ticket.id, reason = %reason, "ticket rejected");
        let mut store = self.store.lock();
        store.patterns.entry(ticket.kind).or_default().rejected += 1;
        store.rejected.insert(
            ticket.id,
            RejectedTicket {
                ticket,
                reason,
                rejected_at: Utc::now(),
            },
        );
    }

    async fn run_ticket(&self, ticket: &Ticket) -> TicketExecution {
        let mut steps = Vec::new();
        for step in parse_steps(&ticket.proposed_solution) {
            match self.executor.execute_step(ticket, &step).await {
                Ok(out) => steps.push(out),
                Err(e) => {
                    tracing::error!(ticket = %ticket.id, step = %step, error = %e, "ticket step failed");
                    return self.roll_back(ticket, step, e.to_string()).await;
                }
            }
        }
        TicketExecution::Executed { steps }
    }

    async fn roll_back(&self, ticket: &Ticket, failed_step: String, error: String) -> TicketExecution {
        let Some(plan) = self.check_auto_approval(ticket).map(|r| r.rollback_plan.clone()) else {
            tracing::warn!(ticket = %ticket.id, "no rollback plan available");
            return TicketExecution::RollbackFailed {
                failed_step,
                error,
                plan: None,
                rollback_error: None,
            };
        };
        match self.executor.rollback(ticket, &plan).await {
            Ok(()) => TicketExecution::RolledBack {
                failed_step,
                error,
                plan,
            },
            Err(e) => {
                tracing::error!(ticket = %ticket.id, plan = %plan, error = %e, "rollback failed");
                TicketExecution::RollbackFailed {
                    failed_step,
                    error,
                    plan: Some(plan),
                    rollback_error: Some(e.to_string()),
                }
            }
        }
    }

    fn hil_context(&self, ticket: &Ticket) -> HilContext {
        let priority = if ticket.issue_severity() == Some(IssueSeverity::Critical) {
            Priority::Critical
        } else {
            Priority::High
        };
        HilContext::new(self.runtime.name(), TICKET_APPROVAL_DECISION, 0.5, priority)
            .with_summary(format!("Approve ticket {}: {}", ticket.id, ticket.title))
            .with_option(HilOption::new(
                "approve",
                "Approve",
                format!("Approve ticket: {}", ticket.title),
                HilAction::ApproveTicket { ticket: ticket.id },
                RiskTier::Low,
            ))
            .with_option(HilOption::new(
                "reject",
                "Reject",
                format!("Reject ticket: {}", ticket.title),
                HilAction::RejectTicket { ticket: ticket.id },
                RiskTier::Low,
            ))
            .with_details(json!({
                "ticket_id": ticket.id.to_string(),
                "kind": ticket.kind,
                "proposed_solution": ticket.proposed_solution,
            }))
    }

    fn approves(response: &HilResponse, context: &HilContext) -> bool {
        match response.chosen(context).map(|o| &o.action) {
            Some(HilAction::ApproveTicket { .. }) => true,
            Some(_) => false,
            None => response.decision == HilDecision::Approved,
        }
    }

    async fn process_pending(&self, context: &ExecutionContext) -> Result<AgentResult, AgentError> {
        let snapshot: Vec<Ticket> = self.store.lock().pending.values().cloned().collect();
        let mut report = CycleReport::default();

        for ticket in snapshot {
            if ticket.status != TicketStatus::PendingHilApproval {
                continue;
            }
            report.processed += 1;

            if let Some(rule) = self.check_auto_approval(&ticket) {
                let (rule_id, confidence) = (rule.id.clone(), rule.confidence);
                let Ok(ticket) = self.take_pending(ticket.id) else {
                    continue;
                };
                self.approve(
                    ticket,
                    Approver::Rule {
                        rule: rule_id.clone(),
                        confidence,
                    },
                    format!("Auto-approved by rule: {rule_id}"),
                )
                .await;
                report.auto_approved += 1;
                continue;
            }

            let hil = self.hil_context(&ticket);
            report.hil_requested += 1;
            let response = match self.request_hil(context, hil.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(ticket = %ticket.id, error = %e, "ticket left pending");
                    report.awaiting_reviewer += 1;
                    continue;
                }
            };

            let Ok(ticket) = self.take_pending(ticket.id) else {
                tracing::debug!("ticket settled out-of-band during escalation");
                continue;
            };
            if Self::approves(&response, &hil) {
                let decided_by = response.decided_by;
                self.approve(ticket, Approver::Hil { decided_by }, response.reason).await;
                report.approved += 1;
            } else {
                self.reject(ticket, response.reason);
                report.rejected += 1;
            }
        }

        self.runtime.record_auto_decisions(report.auto_approved);
        let requires_hil = report.awaiting_reviewer > 0;
        Ok(AgentResult::ok(json!(report)).with_requires_hil(requires_hil))
    }
}

impl TicketSink for ApprovalAgent {
    fn submit_ticket(&self, mut ticket: Ticket) {
        ticket.status = TicketStatus::PendingHilApproval;
        tracing::info!(ticket = %ticket.id, title = %ticket.title, "ticket submitted");
        self.store.lock().pending.insert(ticket.id, ticket);
    }
}

#[async_trait::async_trait]
impl Agent for ApprovalAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.period)
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.runtime.stop().await?;
        let mut store = self.store.lock();
        store.pending.clear();
        store.approved.clear();
        store.rejected.clear();
        Ok(())
    }

    async fn execute(&self, context: ExecutionContext) -> AgentResult {
        if let ContextPayload::Ticket(ticket) = &context.payload {
            self.submit_ticket(ticket.clone());
        }
        self.runtime.run_cycle(self.process_pending(&context)).await
    }

    fn can_handle(&self, context: &ExecutionContext) -> bool {
        matches!(context.payload, ContextPayload::Ticket(_)) || context.trigger == Trigger::Scheduled
    }

    fn requires_hil(&self, context: &ExecutionContext) -> bool {
        match &context.payload {
            ContextPayload::Ticket(ticket) => self.check_auto_approval(ticket).is_none(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LoggingExecutor;
    use warden_core::Issue;

    fn issue(monitor: &str, severity: IssueSeverity) -> Issue {
        Issue {
            monitor: monitor.into(),
            metric: "m".into(),
            value: 1.0,
            threshold: 1.0,
            severity,
            timestamp: Utc::now(),
        }
    }

    fn evolution(monitor: &str, severity: IssueSeverity, solution: &str) -> Ticket {
        Ticket::new(TicketKind::AutomatedEvolution, "t", solution).with_issue(issue(monitor, severity))
    }

    fn agent() -> ApprovalAgent {
        ApprovalAgent::new(Duration::from_secs(10), Arc::new(LoggingExecutor))
    }

    #[test]
    fn first_matching_rule_wins() {
        let agent = agent();
        // matches performance_optimization and monitoring_enhancement
        let ticket = evolution("performance", IssueSeverity::Warning, "add monitoring and caching");
        let rule = agent.check_auto_approval(&ticket).unwrap();
        assert_eq!(rule.id, "performance_optimization");
        assert_eq!(rule.rollback_plan, "revert_performance_changes");
    }

    #[test]
    fn high_risk_words_block_performance_rule() {
        let agent = agent();
        let ticket = evolution("performance", IssueSeverity::Warning, "caching of user data");
        assert!(agent.check_auto_approval(&ticket).is_none());
    }

    #[test]
    fn hardening_rule_requires_warning_security_issue() {
        let agent = agent();
        let ok = evolution("security", IssueSeverity::Warning, "Implement rate limiting, add CAPTCHA");
        assert_eq!(agent.check_auto_approval(&ok).unwrap().id, "security_hardening");

        let critical = evolution("security", IssueSeverity::Critical, "Implement rate limiting");
        assert!(agent.check_auto_approval(&critical).is_none());

        let risky = evolution("security", IssueSeverity::Warning, "rate limiting with permission change");
        assert!(agent.check_auto_approval(&risky).is_none());
    }

    #[test]
    fn manual_tickets_never_auto_approve() {
        let agent = agent();
        let ticket = Ticket::new(TicketKind::Manual, "t", "add monitoring");
        assert!(agent.check_auto_approval(&ticket).is_none());
        assert!(agent.requires_hil(&ExecutionContext::ticket(ticket)));
    }

    #[tokio::test]
    async fn auto_approved_ticket_is_executed() {
        let agent = agent();
        agent.submit_ticket(evolution("error", IssueSeverity::Critical, "improve error handling, add retry logic"));

        let result = agent.execute(ExecutionContext::scheduled()).await;

        assert!(result.success);
        assert_eq!(result.data["auto_approved"], 1);
        assert_eq!(result.metrics.auto_decisions, 1);
        let approved = agent.approved_tickets();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].ticket.status, TicketStatus::Approved);
        match &approved[0].execution {
            TicketExecution::Executed { steps } => assert_eq!(steps.len(), 2),
            other => panic!("unexpected execution: {other:?}"),
        }
        assert!(agent.pending_tickets().is_empty());
    }

    #[tokio::test]
    async fn without_broker_ticket_stays_pending() {
        let agent = agent();
        agent.submit_ticket(Ticket::new(TicketKind::Manual, "rewrite", "change business logic"));

        let result = agent.execute(ExecutionContext::scheduled()).await;

        assert!(result.success);
        assert!(result.requires_hil);
        assert_eq!(agent.pending_tickets().len(), 1);
    }

    #[tokio::test]
    async fn operator_rejection_moves_ticket() {
        let agent = agent();
        let ticket = Ticket::new(TicketKind::Manual, "t", "x");
        let id = ticket.id;
        agent.submit_ticket(ticket);

        agent.reject_ticket(id, "not now").unwrap();

        assert_eq!(agent.rejected_tickets()[0].ticket.status, TicketStatus::Rejected);
        assert_eq!(agent.reject_ticket(id, "again"), Err(TicketError::NotPending(id)));
        assert_eq!(agent.approval_patterns()[&TicketKind::Manual].rejected, 1);
    }
}
