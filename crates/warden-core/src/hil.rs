//! Human-in-the-loop decision types
//!
//! A [`HilContext`] is built per escalation and consumed exactly once by a
//! [`HilBroker`], which answers with a [`HilResponse`]. Options carry a typed
//! [`HilAction`] so the requesting agent can apply the chosen one without
//! string matching.

use crate::domain::TicketId;
use crate::error::HilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Urgency of a decision request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Risk of choosing an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

/// Terminal action attached to an option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HilAction {
    ApproveTicket { ticket: TicketId },
    RejectTicket { ticket: TicketId },
    BlockSource { source: String },
    WatchSource { source: String },
    Ignore,
}

/// One labeled choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HilOption {
    pub id: String,
    pub label: String,
    pub description: String,
    pub action: HilAction,
    pub risk: RiskTier,
}

impl HilOption {
    /// Create option
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        action: HilAction,
        risk: RiskTier,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: description.into(),
            action,
            risk,
        }
    }
}

/// Decision request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HilContext {
    /// Requesting agent
    pub agent: String,
    /// Decision key, matched against the forced-escalation list
    pub decision: String,
    /// Agent's confidence in the default outcome, in [0, 1]
    pub confidence: f64,
    pub priority: Priority,
    pub summary: String,
    pub options: Vec<HilOption>,
    /// Free-form detail for the reviewer
    #[serde(default)]
    pub details: serde_json::Value,
}

impl HilContext {
    /// Create request with no options
    #[must_use]
    pub fn new(
        agent: impl Into<String>,
        decision: impl Into<String>,
        confidence: f64,
        priority: Priority,
    ) -> Self {
        Self {
            agent: agent.into(),
            decision: decision.into(),
            confidence,
            priority,
            summary: String::new(),
            options: Vec::new(),
            details: serde_json::Value::Null,
        }
    }

    /// With summary
    #[inline]
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// With option appended
    #[inline]
    #[must_use]
    pub fn with_option(mut self, option: HilOption) -> Self {
        self.options.push(option);
        self
    }

    /// With details
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Look up an option by id
    #[must_use]
    pub fn option(&self, id: &str) -> Option<&HilOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// Decision outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HilDecision {
    Approved,
    Denied,
    /// Keep watching; no terminal action taken yet
    Monitor,
}

impl std::fmt::Display for HilDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HilDecision::Approved => "approved",
            HilDecision::Denied => "denied",
            HilDecision::Monitor => "monitor",
        })
    }
}

/// Who settled the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    /// Confidence threshold or disabled engine
    Automatic,
    /// Agent-specific handler
    Handler,
    /// Out-of-band reviewer via `resolve_request`
    Reviewer,
    /// Default processing path
    DefaultPolicy,
}

/// Resolution of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HilResponse {
    /// Set when the request was escalated
    pub request_id: Option<Uuid>,
    pub decision: HilDecision,
    pub option_id: Option<String>,
    pub reason: String,
    pub decided_by: DecidedBy,
    pub timestamp: DateTime<Utc>,
}

impl HilResponse {
    /// Create response stamped now
    #[must_use]
    pub fn new(decision: HilDecision, reason: impl Into<String>, decided_by: DecidedBy) -> Self {
        Self {
            request_id: None,
            decision,
            option_id: None,
            reason: reason.into(),
            decided_by,
            timestamp: Utc::now(),
        }
    }

    /// With chosen option
    #[inline]
    #[must_use]
    pub fn with_option(mut self, option_id: impl Into<String>) -> Self {
        self.option_id = Some(option_id.into());
        self
    }

    /// With request ID
    #[inline]
    #[must_use]
    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Whether no human was involved
    #[inline]
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        matches!(self.decided_by, DecidedBy::Automatic | DecidedBy::DefaultPolicy)
    }

    /// The option this response selected within `context`
    #[must_use]
    pub fn chosen<'a>(&self, context: &'a HilContext) -> Option<&'a HilOption> {
        self.option_id.as_deref().and_then(|id| context.option(id))
    }
}

/// Decision broker seam
///
/// Never fails: every path produces a response, falling back to a default
/// policy when handlers misbehave.
#[async_trait::async_trait]
pub trait HilBroker: Send + Sync {
    /// Settle a decision request
    async fn request(&self, context: HilContext) -> HilResponse;
}

/// Agent-specific decision handler
///
/// Registered with the engine under an agent name; stands in for a reviewer
/// UI or an automated policy for that agent.
#[async_trait::async_trait]
pub trait HilHandler: Send + Sync {
    /// Decide an escalated request
    async fn handle(&self, request_id: Uuid, context: &HilContext) -> Result<HilResponse, HilError>;
}
