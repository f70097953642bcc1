//! Security-monitoring agent
//!
//! Drains a queue of [`SecurityEvent`]s. Each event gets an anomaly score
//! (base score by kind times a severity multiplier) and is checked against the
//! [`AlertRule`]s in order. `log` and `notify` act immediately. `block` and
//! `escalate` go through the HIL broker, except that a source with three or
//! more prior critical events is blocked without asking.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use warden_core::{
    notify_best_effort, Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult,
    AgentRuntime, AutonomyLevel, ContextPayload, ExecutionContext, HilAction, HilContext,
    HilDecision, HilOption, HilResponse, Notification, NotificationKind, NotificationSender,
    Priority, RiskTier, RuleAction, SecurityEvent, SecurityEventKind, Severity, Trigger,
};

/// Registered name
pub const SECURITY_AGENT: &str = "security";

/// Prior critical events from one source that allow blocking without review
pub const AUTO_BLOCK_VIOLATIONS: usize = 3;

const EVENT_HISTORY_LIMIT: usize = 1000;
const SCORE_HISTORY_LIMIT: usize = 100;

/// Base anomaly score of an event kind
#[must_use]
pub fn base_score(kind: &SecurityEventKind) -> f64 {
    match kind {
        SecurityEventKind::FailedLogin => 5.0,
        SecurityEventKind::SuspiciousActivity => 7.0,
        SecurityEventKind::UnauthorizedAccess => 9.0,
        SecurityEventKind::Other(_) => 3.0,
    }
}

#[must_use]
pub const fn severity_multiplier(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 1.0,
        Severity::Medium => 1.2,
        Severity::High => 1.5,
        Severity::Critical => 2.0,
    }
}

/// How long a source stays blocked
#[must_use]
pub const fn block_duration(severity: Severity) -> Duration {
    match severity {
        Severity::Critical => Duration::from_secs(24 * 3600),
        Severity::High => Duration::from_secs(3600),
        Severity::Medium => Duration::from_secs(1800),
        Severity::Low => Duration::from_secs(600),
    }
}

/// Event kind, score threshold and the action taken when both match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub kind: SecurityEventKind,
    pub threshold: f64,
    pub action: RuleAction,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: SecurityEventKind,
        threshold: f64,
        action: RuleAction,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            threshold,
            action,
        }
    }

    /// The built-in rules, in evaluation order
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "failed_logins",
                "Failed Login Threshold",
                SecurityEventKind::FailedLogin,
                7.0,
                RuleAction::Notify,
            ),
            Self::new(
                "suspicious_activity",
                "Suspicious Activity Detection",
                SecurityEventKind::SuspiciousActivity,
                8.0,
                RuleAction::Escalate,
            ),
            Self::new(
                "unauthorized_access",
                "Unauthorized Access Attempt",
                SecurityEventKind::UnauthorizedAccess,
                9.0,
                RuleAction::Block,
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockEntry {
    pub source: String,
    pub reason: String,
    pub severity: Severity,
    pub blocked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One rule firing, as reported in the cycle result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFiring {
    pub rule: String,
    pub action: RuleAction,
    /// What actually happened: `logged`, `notified`, `blocked`, `auto_blocked`,
    /// `watched`, `ignored` or `awaiting_review`
    pub outcome: String,
}

/// One scored event, as reported in the cycle result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEvent {
    pub event_id: String,
    pub kind: String,
    pub severity: Severity,
    pub source: Option<String>,
    pub score: f64,
    pub firings: Vec<RuleFiring>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub processed: usize,
    pub alerts_triggered: usize,
    pub actions_taken: usize,
    pub escalations: usize,
    pub events: Vec<ScoredEvent>,
}

/// Rule feedback used to tune thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RuleEffectiveness {
    pub false_positives: u32,
    pub true_positives: u32,
    pub average_score: f64,
}

#[derive(Debug, Default)]
struct SecurityState {
    queue: VecDeque<SecurityEvent>,
    processed: VecDeque<SecurityEvent>,
    blocked: HashMap<String, BlockEntry>,
    watched: HashSet<String>,
    thresholds: HashMap<String, f64>,
    score_history: HashMap<String, VecDeque<f64>>,
    effectiveness: HashMap<String, RuleEffectiveness>,
}

impl SecurityState {
    fn prior_critical_from(&self, source: &str) -> usize {
        self.processed
            .iter()
            .filter(|e| e.severity == Severity::Critical && e.source.as_deref() == Some(source))
            .count()
    }
}

/// Anomaly scoring and rule-driven response
pub struct SecurityAgent {
    runtime: AgentRuntime,
    period: Duration,
    rules: IndexMap<String, AlertRule>,
    notifier: Arc<dyn NotificationSender>,
    state: Mutex<SecurityState>,
}

impl std::fmt::Debug for SecurityAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SecurityAgent")
            .field("runtime", &self.runtime)
            .field("queued", &state.queue.len())
            .field("blocked", &state.blocked.len())
            .finish_non_exhaustive()
    }
}

impl SecurityAgent {
    #[must_use]
    pub fn new(period: Duration, notifier: Arc<dyn NotificationSender>) -> Self {
        let descriptor = AgentDescriptor::new(SECURITY_AGENT, AgentCategory::Security, AutonomyLevel::Partial)
            .with_description("Scores security events and blocks or escalates threats");
        Self {
            runtime: AgentRuntime::new(descriptor),
            period,
            rules: AlertRule::defaults().into_iter().map(|r| (r.id.clone(), r)).collect(),
            notifier,
            state: Mutex::new(SecurityState::default()),
        }
    }

    /// Append a rule, or replace one with the same id in place
    #[must_use]
    pub fn with_rule(mut self, rule: AlertRule) -> Self {
        self.rules.insert(rule.id.clone(), rule);
        self
    }

    /// Queue an event for the next cycle
    pub fn submit_event(&self, event: SecurityEvent) {
        self.state.lock().queue.push_back(event);
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Current threshold of a rule, adapted or configured
    #[must_use]
    pub fn rule_threshold(&self, rule_id: &str) -> Option<f64> {
        let configured = self.rules.get(rule_id)?.threshold;
        Some(self.state.lock().thresholds.get(rule_id).copied().unwrap_or(configured))
    }

    /// Anomaly score of `event` given what has been learned so far
    #[must_use]
    pub fn anomaly_score(&self, event: &SecurityEvent) -> f64 {
        let mut base = base_score(&event.kind);
        if let Some(history) = self.state.lock().score_history.get(event.kind.key()) {
            if history.len() >= 5 {
                let recent: Vec<f64> = history.iter().rev().take(10).copied().collect();
                let avg = recent.iter().sum::<f64>() / recent.len() as f64;
                if avg > base {
                    base = avg * 0.9;
                }
            }
        }
        base * severity_multiplier(event.severity)
    }

    /// Whether `source` is blocked right now
    #[must_use]
    pub fn is_blocked(&self, source: &str) -> bool {
        self.state
            .lock()
            .blocked
            .get(source)
            .is_some_and(|b| b.expires_at > Utc::now())
    }

    #[must_use]
    pub fn blocked_sources(&self) -> Vec<BlockEntry> {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.blocked.retain(|_, b| b.expires_at > now);
        state.blocked.values().cloned().collect()
    }

    #[must_use]
    pub fn is_watched(&self, source: &str) -> bool {
        self.state.lock().watched.contains(source)
    }

    /// Record whether a firing of `rule_id` was a false positive
    pub fn record_rule_feedback(&self, rule_id: &str, false_positive: bool, score: f64) {
        let mut state = self.state.lock();
        let e = state.effectiveness.entry(rule_id.to_string()).or_default();
        if false_positive {
            e.false_positives += 1;
        } else {
            e.true_positives += 1;
        }
        let total = f64::from(e.false_positives + e.true_positives);
        e.average_score = (e.average_score * (total - 1.0) + score) / total;
    }

    #[must_use]
    pub fn rule_effectiveness(&self) -> HashMap<String, RuleEffectiveness> {
        self.state.lock().effectiveness.clone()
    }

    fn matching_rules(&self, event: &SecurityEvent, score: f64) -> Vec<AlertRule> {
        let state = self.state.lock();
        self.rules
            .values()
            .filter(|r| {
                let threshold = state.thresholds.get(&r.id).copied().unwrap_or(r.threshold);
                r.kind == event.kind && score >= threshold
            })
            .cloned()
            .collect()
    }

    fn block(&self, source: &str, event: &SecurityEvent) {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(block_duration(event.severity))
            .map_or(now, |d| now + d);
        tracing::warn!(source, kind = %event.kind, until = %expires_at, "source blocked");
        metrics::counter!("warden_security_blocks_total", "kind" => event.kind.key().to_string()).increment(1);
        self.state.lock().blocked.insert(
            source.to_string(),
            BlockEntry {
                source: source.to_string(),
                reason: event.kind.key().to_string(),
                severity: event.severity,
                blocked_at: now,
                expires_at,
            },
        );
    }

    async fn notify(&self, rule: &AlertRule, event: &SecurityEvent, score: f64) {
        let notification = Notification::new(
            NotificationKind::Security,
            event.severity,
            format!("Security Alert: {}", rule.name),
            format!("{} (Score: {score:.1})", event.description),
        )
        .with_details(json!({ "event_kind": event.kind.key(), "rule": rule.id, "score": score }));
        notify_best_effort(self.notifier.as_ref(), notification).await;
    }

    fn hil_context(&self, rule: &AlertRule, event: &SecurityEvent, score: f64) -> HilContext {
        let source = event.source.clone().unwrap_or_default();
        let priority = if event.severity == Severity::Critical {
            Priority::Critical
        } else {
            Priority::High
        };
        HilContext::new(self.runtime.name(), rule.action.as_str(), (score / 10.0).min(1.0), priority)
            .with_summary(format!("{}: {}", rule.name, event.description))
            .with_option(HilOption::new(
                "block",
                "Block source",
                format!("Block {source} due to {}", event.kind),
                HilAction::BlockSource { source: source.clone() },
                RiskTier::Medium,
            ))
            .with_option(HilOption::new(
                "monitor",
                "Monitor only",
                format!("Watch {source} without blocking"),
                HilAction::WatchSource { source: source.clone() },
                RiskTier::Low,
            ))
            .with_option(HilOption::new(
                "ignore",
                "Ignore",
                "Ignore this event",
                HilAction::Ignore,
                RiskTier::Low,
            ))
            .with_details(json!({
                "event_id": event.id.to_string(),
                "rule": rule.id,
                "score": score,
                "source": event.source,
            }))
    }

    fn apply_review(&self, response: &HilResponse, context: &HilContext, event: &SecurityEvent) -> &'static str {
        let action = match response.chosen(context).map(|o| o.action.clone()) {
            Some(action) => action,
            None => match (response.decision, event.source.clone()) {
                (HilDecision::Approved, Some(source)) => HilAction::BlockSource { source },
                (HilDecision::Monitor, Some(source)) => HilAction::WatchSource { source },
                _ => HilAction::Ignore,
            },
        };
        match action {
            HilAction::BlockSource { source } if !source.is_empty() => {
                self.block(&source, event);
                "blocked"
            }
            HilAction::WatchSource { source } if !source.is_empty() => {
                tracing::info!(source = %source, "source placed on watch list");
                self.state.lock().watched.insert(source);
                "watched"
            }
            _ => "ignored",
        }
    }

    async fn act(
        &self,
        rule: &AlertRule,
        event: &SecurityEvent,
        score: f64,
        context: &ExecutionContext,
        report: &mut SecurityReport,
    ) -> RuleFiring {
        let firing = |outcome: &str| RuleFiring {
            rule: rule.id.clone(),
            action: rule.action,
            outcome: outcome.to_string(),
        };
        match rule.action {
            RuleAction::Log => {
                tracing::warn!(rule = %rule.name, event = %event.description, score, "security alert");
                report.actions_taken += 1;
                firing("logged")
            }
            RuleAction::Notify => {
                self.notify(rule, event, score).await;
                report.actions_taken += 1;
                firing("notified")
            }
            RuleAction::Block | RuleAction::Escalate => {
                if rule.action == RuleAction::Block {
                    if let Some(source) = event.source.as_deref() {
                        let prior = self.state.lock().prior_critical_from(source);
                        if prior >= AUTO_BLOCK_VIOLATIONS {
                            self.block(source, event);
                            report.actions_taken += 1;
                            return firing("auto_blocked");
                        }
                    }
                }

                report.escalations += 1;
                let hil = self.hil_context(rule, event, score);
                match self.request_hil(context, hil.clone()).await {
                    Ok(response) => firing(self.apply_review(&response, &hil, event)),
                    Err(e) => {
                        tracing::warn!(rule = %rule.id, error = %e, "security action awaiting review");
                        firing("awaiting_review")
                    }
                }
            }
        }
    }

    fn remember(&self, event: SecurityEvent, score: f64) {
        let mut state = self.state.lock();
        let history = state.score_history.entry(event.kind.key().to_string()).or_default();
        history.push_back(score);
        while history.len() > SCORE_HISTORY_LIMIT {
            history.pop_front();
        }
        state.processed.push_back(event);
        while state.processed.len() > EVENT_HISTORY_LIMIT {
            state.processed.pop_front();
        }
    }

    async fn drain(&self, context: &ExecutionContext) -> Result<AgentResult, AgentError> {
        let mut report = SecurityReport::default();

        loop {
            let Some(event) = self.state.lock().queue.pop_front() else {
                break;
            };
            report.processed += 1;
            let score = self.anomaly_score(&event);

            let mut firings = Vec::new();
            for rule in self.matching_rules(&event, score) {
                report.alerts_triggered += 1;
                firings.push(self.act(&rule, &event, score, context, &mut report).await);
            }

            report.events.push(ScoredEvent {
                event_id: event.id.to_string(),
                kind: event.kind.key().to_string(),
                severity: event.severity,
                source: event.source.clone(),
                score,
                firings,
            });
            self.remember(event, score);
        }

        self.runtime.record_auto_decisions(report.actions_taken as u64);
        let awaiting = report
            .events
            .iter()
            .flat_map(|e| &e.firings)
            .any(|f| f.outcome == "awaiting_review");
        Ok(AgentResult::ok(json!(report)).with_requires_hil(awaiting))
    }
}

#[async_trait::async_trait]
impl Agent for SecurityAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.period)
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.runtime.stop().await?;
        let mut state = self.state.lock();
        state.queue.clear();
        state.processed.clear();
        state.blocked.clear();
        Ok(())
    }

    async fn execute(&self, context: ExecutionContext) -> AgentResult {
        if let ContextPayload::SecurityEvent(event) = &context.payload {
            self.submit_event(event.clone());
        }
        self.runtime.run_cycle(self.drain(&context)).await
    }

    fn can_handle(&self, context: &ExecutionContext) -> bool {
        matches!(
            context.payload,
            ContextPayload::SecurityEvent(_) | ContextPayload::SecurityAction { .. }
        ) || context.trigger == Trigger::Scheduled
    }

    fn requires_hil(&self, context: &ExecutionContext) -> bool {
        match &context.payload {
            ContextPayload::SecurityAction { action, .. } => action.is_sensitive(),
            ContextPayload::SecurityEvent(event) => {
                let score = self.anomaly_score(event);
                self.matching_rules(event, score)
                    .iter()
                    .any(|r| r.action.is_sensitive())
            }
            _ => false,
        }
    }

    /// Tune rule thresholds from false-positive feedback
    async fn adapt_strategy(&self) {
        let mut changes = serde_json::Map::new();
        {
            let mut state = self.state.lock();
            let feedback: Vec<(String, RuleEffectiveness)> =
                state.effectiveness.iter().map(|(k, v)| (k.clone(), *v)).collect();
            for (rule_id, e) in feedback {
                let total = e.false_positives + e.true_positives;
                let Some(rule) = self.rules.get(&rule_id) else {
                    continue;
                };
                if total < 5 {
                    continue;
                }
                let current = state.thresholds.get(&rule_id).copied().unwrap_or(rule.threshold);
                let fp_rate = f64::from(e.false_positives) / f64::from(total);
                let next = if fp_rate > 0.4 {
                    current * 1.1
                } else if fp_rate < 0.1 && e.true_positives > 0 {
                    current * 0.95
                } else {
                    continue;
                };
                state.thresholds.insert(rule_id.clone(), next);
                if let Some(e) = state.effectiveness.get_mut(&rule_id) {
                    e.false_positives = 0;
                    e.true_positives = 0;
                }
                changes.insert(rule_id, json!(next));
            }
        }
        if !changes.is_empty() {
            self.runtime.strategy_adapted(serde_json::Value::Object(changes)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::LogNotifier;

    fn agent() -> SecurityAgent {
        SecurityAgent::new(Duration::from_secs(5), Arc::new(LogNotifier))
    }

    #[test]
    fn critical_unauthorized_access_scores_eighteen() {
        let agent = agent();
        let event = SecurityEvent::new(SecurityEventKind::UnauthorizedAccess, Severity::Critical, "root login");
        let score = agent.anomaly_score(&event);
        assert!((score - 18.0).abs() < f64::EPSILON);

        let rules = agent.matching_rules(&event, score);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, RuleAction::Block);
    }

    #[test]
    fn low_failed_login_fires_nothing() {
        let agent = agent();
        let event = SecurityEvent::new(SecurityEventKind::FailedLogin, Severity::Low, "bad password");
        let score = agent.anomaly_score(&event);
        assert!(agent.matching_rules(&event, score).is_empty());
    }

    #[test]
    fn block_durations_follow_severity() {
        assert_eq!(block_duration(Severity::Critical), Duration::from_secs(86_400));
        assert_eq!(block_duration(Severity::Low), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn auto_block_after_three_critical_events() {
        let agent = agent();
        for _ in 0..3 {
            agent.submit_event(
                SecurityEvent::new(SecurityEventKind::Other("port_scan".into()), Severity::Critical, "scan")
                    .with_source("10.0.0.9"),
            );
        }
        agent.execute(ExecutionContext::scheduled()).await;

        let event = SecurityEvent::new(SecurityEventKind::UnauthorizedAccess, Severity::High, "admin probe")
            .with_source("10.0.0.9");
        let result = agent.execute(ExecutionContext::security_event(event)).await;

        assert!(result.success);
        assert_eq!(result.data["events"][0]["firings"][0]["outcome"], "auto_blocked");
        assert!(agent.is_blocked("10.0.0.9"));
    }

    #[tokio::test]
    async fn escalation_without_broker_awaits_review() {
        let agent = agent();
        let event = SecurityEvent::new(SecurityEventKind::SuspiciousActivity, Severity::High, "odd pattern")
            .with_source("10.0.0.2");
        assert!(agent.requires_hil(&ExecutionContext::security_event(event.clone())));

        let result = agent.execute(ExecutionContext::security_event(event)).await;

        assert!(result.success);
        assert!(result.requires_hil);
        assert_eq!(result.data["escalations"], 1);
        assert!(!agent.is_blocked("10.0.0.2"));
    }

    #[tokio::test]
    async fn noisy_rule_threshold_rises() {
        let agent = agent();
        for _ in 0..3 {
            agent.record_rule_feedback("failed_logins", true, 7.5);
        }
        for _ in 0..2 {
            agent.record_rule_feedback("failed_logins", false, 7.5);
        }

        agent.adapt_strategy().await;

        let threshold = agent.rule_threshold("failed_logins").unwrap();
        assert!((threshold - 7.7).abs() < 1e-9);

        // feedback is consumed; another pass leaves the threshold alone
        agent.adapt_strategy().await;
        let again = agent.rule_threshold("failed_logins").unwrap();
        assert!((again - 7.7).abs() < 1e-9);
        assert_eq!(agent.rule_effectiveness()["failed_logins"].false_positives, 0);
    }
}
