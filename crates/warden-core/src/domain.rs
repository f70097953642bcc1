//! Typed payloads routed between agents
//!
//! - [`Ticket`]: a proposed change awaiting approval
//! - [`SecurityEvent`]: an inbound security occurrence
//! - [`RuleAction`]: what a security alert rule does when it fires

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique ticket identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(pub Ulid);

impl TicketId {
    /// Generate new ticket ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TKT-{}", self.0)
    }
}

/// Origin of a ticket; selects how its steps are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketKind {
    /// Generated from a critical monitoring issue
    AutomatedEvolution,
    SystemOptimization,
    SecurityResponse,
    /// Anything submitted by hand
    Manual,
}

/// Approval state; moves out of `PendingHilApproval` exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    PendingHilApproval,
    Approved,
    Rejected,
}

/// Breach tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IssueSeverity::Warning => "warning",
            IssueSeverity::Critical => "critical",
        })
    }
}

/// A point-in-time threshold breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub monitor: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: IssueSeverity,
    pub timestamp: DateTime<Utc>,
}

/// Proposed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub kind: TicketKind,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    /// Issue the ticket remediates, if generated from one
    pub issue: Option<Issue>,
    /// Free text; steps separated by `,` `;` or newlines
    pub proposed_solution: String,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Create pending ticket
    #[must_use]
    pub fn new(kind: TicketKind, title: impl Into<String>, proposed_solution: impl Into<String>) -> Self {
        Self {
            id: TicketId::new(),
            kind,
            title: title.into(),
            description: String::new(),
            status: TicketStatus::PendingHilApproval,
            issue: None,
            proposed_solution: proposed_solution.into(),
            created_at: Utc::now(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With originating issue
    #[inline]
    #[must_use]
    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issue = Some(issue);
        self
    }

    /// Monitor of the originating issue
    #[inline]
    #[must_use]
    pub fn issue_monitor(&self) -> Option<&str> {
        self.issue.as_ref().map(|i| i.monitor.as_str())
    }

    /// Severity of the originating issue
    #[inline]
    #[must_use]
    pub fn issue_severity(&self) -> Option<IssueSeverity> {
        self.issue.as_ref().map(|i| i.severity)
    }
}

/// Four-tier severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

/// Kind of security occurrence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    FailedLogin,
    SuspiciousActivity,
    UnauthorizedAccess,
    Other(String),
}

impl SecurityEventKind {
    /// Stable key used for learning tables
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            SecurityEventKind::FailedLogin => "failed_login",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
            SecurityEventKind::UnauthorizedAccess => "unauthorized_access",
            SecurityEventKind::Other(name) => name,
        }
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Inbound security occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Ulid,
    pub kind: SecurityEventKind,
    pub description: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Origin (IP, user, host); events without one cannot be blocked
    pub source: Option<String>,
}

impl SecurityEvent {
    /// Create event stamped now
    #[must_use]
    pub fn new(kind: SecurityEventKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            kind,
            description: description.into(),
            severity,
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// With source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Action taken when an alert rule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Log,
    Notify,
    Block,
    Escalate,
}

impl RuleAction {
    /// Whether the action changes state and must pass through HIL
    #[inline]
    #[must_use]
    pub const fn is_sensitive(self) -> bool {
        matches!(self, RuleAction::Block | RuleAction::Escalate)
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RuleAction::Log => "log",
            RuleAction::Notify => "notify",
            RuleAction::Block => "block",
            RuleAction::Escalate => "escalate",
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_starts_pending() {
        let t = Ticket::new(TicketKind::AutomatedEvolution, "fix", "add caching");
        assert_eq!(t.status, TicketStatus::PendingHilApproval);
        assert!(t.id.to_string().starts_with("TKT-"));
        assert_eq!(t.issue_monitor(), None);
    }

    #[test]
    fn ticket_kind_wire_names() {
        let json = serde_json::to_string(&TicketKind::AutomatedEvolution).unwrap();
        assert_eq!(json, "\"AUTOMATED_EVOLUTION\"");
        let json = serde_json::to_string(&TicketStatus::PendingHilApproval).unwrap();
        assert_eq!(json, "\"PENDING_HIL_APPROVAL\"");
    }

    #[test]
    fn only_block_and_escalate_are_sensitive() {
        assert!(RuleAction::Block.is_sensitive());
        assert!(RuleAction::Escalate.is_sensitive());
        assert!(!RuleAction::Log.is_sensitive());
        assert!(!RuleAction::Notify.is_sensitive());
    }
}
