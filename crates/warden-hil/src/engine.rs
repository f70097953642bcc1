//! HIL escalation engine
//!
//! Decision order for [`HilEngine::request_hil`]:
//! 1. Disabled: approve at or above the threshold, deny below it
//! 2. Decision key in the forced list: escalate regardless of confidence
//! 3. Confidence at or above the threshold: auto-approve
//! 4. Escalate: track as pending, then ask the agent's handler (bounded by
//!    the timeout) or run default processing
//!
//! Default processing notifies, then answers `monitor` for critical
//! requests or waits out the review window and approves. A reviewer may
//! settle any pending request early through [`HilEngine::resolve_request`].
//! Pending entries are always removed when the request returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;
use warden_core::{
    notify_best_effort, DecidedBy, HilBroker, HilConfig, HilContext, HilDecision, HilError,
    HilHandler, HilResponse, Notification, NotificationKind, NotificationSender, Priority,
    Severity,
};

struct PendingRequest {
    context: HilContext,
    created_at: DateTime<Utc>,
    resolver: Option<oneshot::Sender<HilResponse>>,
}

/// Read-only view of a pending request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSummary {
    pub id: Uuid,
    pub agent: String,
    pub decision: String,
    pub confidence: f64,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HilStats {
    pub auto_approved: u64,
    pub auto_denied: u64,
    pub escalated: u64,
    pub handler_decisions: u64,
    pub handler_failures: u64,
    pub timeouts: u64,
    pub default_decisions: u64,
    pub reviewer_decisions: u64,
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    auto_approved: AtomicU64,
    auto_denied: AtomicU64,
    escalated: AtomicU64,
    handler_decisions: AtomicU64,
    handler_failures: AtomicU64,
    timeouts: AtomicU64,
    default_decisions: AtomicU64,
    reviewer_decisions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, path: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("warden_hil_decisions_total", "path" => path).increment(1);
    }
}

/// Decision broker with pending-request tracking
pub struct HilEngine {
    config: RwLock<HilConfig>,
    pending: DashMap<Uuid, PendingRequest>,
    handlers: DashMap<String, Arc<dyn HilHandler>>,
    notifier: Arc<dyn NotificationSender>,
    counters: Counters,
}

impl std::fmt::Debug for HilEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HilEngine")
            .field("config", &*self.config.read())
            .field("pending", &self.pending.len())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl HilEngine {
    /// Create engine
    #[must_use]
    pub fn new(config: HilConfig, notifier: Arc<dyn NotificationSender>) -> Self {
        Self {
            config: RwLock::new(config),
            pending: DashMap::new(),
            handlers: DashMap::new(),
            notifier,
            counters: Counters::default(),
        }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> HilConfig {
        self.config.read().clone()
    }

    /// Replace configuration; affects requests started afterwards
    pub fn update_config(&self, config: HilConfig) {
        tracing::info!(
            enabled = config.enabled,
            threshold = config.auto_approve_threshold,
            "HIL configuration updated"
        );
        *self.config.write() = config;
    }

    /// Register the handler for `agent`, replacing any previous one
    pub fn register_handler(&self, agent: impl Into<String>, handler: Arc<dyn HilHandler>) {
        let agent = agent.into();
        tracing::debug!(agent = %agent, "HIL handler registered");
        self.handlers.insert(agent, handler);
    }

    /// Remove the handler for `agent`
    pub fn unregister_handler(&self, agent: &str) -> Result<(), HilError> {
        self.handlers
            .remove(agent)
            .map(|_| ())
            .ok_or_else(|| HilError::NoHandler(agent.to_string()))
    }

    /// Decide a request
    pub async fn request_hil(&self, context: HilContext) -> HilResponse {
        let config = self.config();
        let pct = context.confidence * 100.0;
        let threshold_pct = config.auto_approve_threshold * 100.0;

        if !config.enabled {
            return if context.confidence >= config.auto_approve_threshold {
                Counters::bump(&self.counters.auto_approved, "auto_approved");
                HilResponse::new(
                    HilDecision::Approved,
                    format!("HIL disabled, auto-approved at {pct:.1}% confidence"),
                    DecidedBy::Automatic,
                )
            } else {
                Counters::bump(&self.counters.auto_denied, "auto_denied");
                HilResponse::new(
                    HilDecision::Denied,
                    format!("HIL disabled, auto-denied at {pct:.1}% confidence (threshold {threshold_pct:.1}%)"),
                    DecidedBy::Automatic,
                )
            };
        }

        let forced = config.is_forced(&context.decision);
        if !forced && context.confidence >= config.auto_approve_threshold {
            Counters::bump(&self.counters.auto_approved, "auto_approved");
            tracing::debug!(
                agent = %context.agent,
                decision = %context.decision,
                confidence = context.confidence,
                "auto-approved"
            );
            let mut response = HilResponse::new(
                HilDecision::Approved,
                format!("Auto-approved with {pct:.1}% confidence"),
                DecidedBy::Automatic,
            );
            response.option_id = context.options.first().map(|o| o.id.clone());
            return response;
        }

        self.escalate(context, &config, forced).await
    }

    async fn escalate(&self, context: HilContext, config: &HilConfig, forced: bool) -> HilResponse {
        let id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                context: context.clone(),
                created_at: Utc::now(),
                resolver: Some(tx),
            },
        );
        Counters::bump(&self.counters.escalated, "escalated");
        tracing::info!(
            request_id = %id,
            agent = %context.agent,
            decision = %context.decision,
            confidence = context.confidence,
            priority = ?context.priority,
            forced,
            "HIL escalation"
        );

        let handler = self.handlers.get(&context.agent).map(|h| Arc::clone(h.value()));
        let from_handler = match handler {
            Some(handler) => {
                tokio::select! {
                    outcome = tokio::time::timeout(config.timeout(), handler.handle(id, &context)) => {
                        match outcome {
                            Ok(Ok(response)) => {
                                Counters::bump(&self.counters.handler_decisions, "handler");
                                Some(response.with_request_id(id))
                            }
                            Ok(Err(e)) => {
                                Counters::bump(&self.counters.handler_failures, "handler_failed");
                                tracing::warn!(request_id = %id, agent = %context.agent, error = %e, "HIL handler failed, using default processing");
                                None
                            }
                            Err(_) => {
                                Counters::bump(&self.counters.timeouts, "handler_timeout");
                                tracing::warn!(request_id = %id, agent = %context.agent, timeout_ms = config.timeout_ms, "HIL handler timed out, using default processing");
                                None
                            }
                        }
                    }
                    Ok(resolved) = &mut rx => Some(resolved),
                }
            }
            None => None,
        };

        let response = match from_handler {
            Some(response) => response,
            None => self.default_processing(id, &context, config, rx).await,
        };

        self.pending.remove(&id);
        tracing::info!(
            request_id = %id,
            decision = %response.decision,
            decided_by = ?response.decided_by,
            "HIL request settled"
        );
        response
    }

    async fn default_processing(
        &self,
        id: Uuid,
        context: &HilContext,
        config: &HilConfig,
        rx: oneshot::Receiver<HilResponse>,
    ) -> HilResponse {
        let severity = match context.priority {
            Priority::Critical => Severity::Critical,
            Priority::High => Severity::High,
            Priority::Medium => Severity::Medium,
            Priority::Low => Severity::Low,
        };
        let notification = Notification::new(
            NotificationKind::Escalation,
            severity,
            format!("HIL decision required: {}", context.decision),
            if context.summary.is_empty() {
                format!("{} requests a decision on {}", context.agent, context.decision)
            } else {
                context.summary.clone()
            },
        )
        .with_details(json!({
            "request_id": id,
            "agent": context.agent,
            "confidence": context.confidence,
            "options": context.options.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
        }));
        notify_best_effort(self.notifier.as_ref(), notification).await;

        if context.priority == Priority::Critical {
            Counters::bump(&self.counters.default_decisions, "default_monitor");
            let mut response = HilResponse::new(
                HilDecision::Monitor,
                "Critical priority: monitoring until a reviewer decides",
                DecidedBy::DefaultPolicy,
            )
            .with_request_id(id);
            response.option_id = context.option("monitor").map(|o| o.id.clone());
            return response;
        }

        let window = config.review_delay().min(config.timeout());
        tokio::select! {
            resolved = rx => match resolved {
                Ok(response) => response,
                Err(_) => self.approve_after_window(id, context, window),
            },
            () = tokio::time::sleep(window) => self.approve_after_window(id, context, window),
        }
    }

    fn approve_after_window(&self, id: Uuid, context: &HilContext, window: Duration) -> HilResponse {
        Counters::bump(&self.counters.default_decisions, "default_approved");
        let mut response = HilResponse::new(
            HilDecision::Approved,
            format!("No objection within {}ms review window", window.as_millis()),
            DecidedBy::DefaultPolicy,
        )
        .with_request_id(id);
        response.option_id = context.options.first().map(|o| o.id.clone());
        response
    }

    /// Settle a pending request on behalf of a reviewer
    pub fn resolve_request(
        &self,
        id: Uuid,
        decision: HilDecision,
        option_id: Option<&str>,
        reason: impl Into<String>,
    ) -> Result<(), HilError> {
        let (_, mut pending) = self.pending.remove(&id).ok_or(HilError::UnknownRequest(id))?;

        let mut response =
            HilResponse::new(decision, reason, DecidedBy::Reviewer).with_request_id(id);
        response.option_id = option_id.map(String::from);

        Counters::bump(&self.counters.reviewer_decisions, "reviewer");
        tracing::info!(
            request_id = %id,
            agent = %pending.context.agent,
            decision = %decision,
            waited_ms = (Utc::now() - pending.created_at).num_milliseconds(),
            "HIL request resolved by reviewer"
        );
        if let Some(tx) = pending.resolver.take() {
            // Requester may already have given up
            let _ = tx.send(response);
        }
        Ok(())
    }

    /// Snapshot of outstanding requests, oldest first
    #[must_use]
    pub fn pending_requests(&self) -> Vec<PendingSummary> {
        let mut list: Vec<PendingSummary> = self
            .pending
            .iter()
            .map(|entry| PendingSummary {
                id: *entry.key(),
                agent: entry.context.agent.clone(),
                decision: entry.context.decision.clone(),
                confidence: entry.context.confidence,
                priority: entry.context.priority,
                created_at: entry.created_at,
            })
            .collect();
        list.sort_by_key(|p| p.created_at);
        list
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn stats(&self) -> HilStats {
        let c = &self.counters;
        HilStats {
            auto_approved: c.auto_approved.load(Ordering::Relaxed),
            auto_denied: c.auto_denied.load(Ordering::Relaxed),
            escalated: c.escalated.load(Ordering::Relaxed),
            handler_decisions: c.handler_decisions.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            default_decisions: c.default_decisions.load(Ordering::Relaxed),
            reviewer_decisions: c.reviewer_decisions.load(Ordering::Relaxed),
            pending: self.pending.len(),
        }
    }
}

#[async_trait]
impl HilBroker for HilEngine {
    async fn request(&self, context: HilContext) -> HilResponse {
        self.request_hil(context).await
    }
}
