//! Injected external capabilities
//!
//! Agents never locate collaborators themselves; the host passes them in at
//! construction.
//!
//! - [`NotificationSender`]: outbound alerts (failures are logged, never fatal)
//! - [`TicketSink`]: fire-and-forget ticket submission
//! - [`MetricsSource`]: named numeric readings for monitors and resource checks
//! - [`HealthProbe`]: reachability check of a dependency (database, cache, ...)

use crate::domain::{Severity, Ticket};
use crate::error::{AgentError, NotificationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Notification channel category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Health,
    Monitoring,
    Security,
    Escalation,
}

/// Outbound notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Notification {
    /// Create notification stamped now
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    /// With details
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Notification backend
#[async_trait::async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver one notification
    async fn send_notification(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Sender that writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationSender for LogNotifier {
    async fn send_notification(&self, n: Notification) -> Result<(), NotificationError> {
        match n.severity {
            Severity::Critical | Severity::High => {
                tracing::warn!(kind = ?n.kind, severity = %n.severity, title = %n.title, "{}", n.message);
            }
            Severity::Medium | Severity::Low => {
                tracing::info!(kind = ?n.kind, severity = %n.severity, title = %n.title, "{}", n.message);
            }
        }
        Ok(())
    }
}

/// Send and swallow failures; returns whether delivery succeeded
pub async fn notify_best_effort(sender: &dyn NotificationSender, notification: Notification) -> bool {
    let title = notification.title.clone();
    match sender.send_notification(notification).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(title = %title, error = %e, "notification delivery failed");
            false
        }
    }
}

/// Receiver of generated tickets
pub trait TicketSink: Send + Sync {
    /// Queue a ticket for approval; must not block
    fn submit_ticket(&self, ticket: Ticket);
}

/// Metric name to value
pub type MetricSample = BTreeMap<String, f64>;

/// Source of metric readings
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    /// Read current values
    async fn collect(&self) -> Result<MetricSample, AgentError>;
}

/// Successful probe reading
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReading {
    pub latency: Duration,
    pub detail: Option<String>,
}

impl ProbeReading {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            detail: None,
        }
    }
}

/// Dependency reachability probe
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe once
    async fn probe(&self) -> Result<ProbeReading, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    #[async_trait::async_trait]
    impl NotificationSender for Refusing {
        async fn send_notification(&self, _n: Notification) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("offline".into()))
        }
    }

    #[tokio::test]
    async fn best_effort_swallows_failure() {
        let n = Notification::new(NotificationKind::Health, Severity::High, "t", "m");
        assert!(!notify_best_effort(&Refusing, n.clone()).await);
        assert!(notify_best_effort(&LogNotifier, n).await);
    }
}
