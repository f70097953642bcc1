//! Monitoring agent
//!
//! Runs a set of [`Monitor`]s each cycle. A monitor reads a metric sample from
//! its [`MetricsSource`] and compares every known metric against a
//! warning/critical [`Threshold`]. Every breach becomes an [`Issue`]; new
//! issues become [`Alert`]s. Critical issues additionally submit an evolution
//! ticket to the [`TicketSink`] and trigger a monitor-specific [`Mitigation`].

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use warden_core::{
    notify_best_effort, Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult,
    AgentRuntime, AutonomyLevel, ExecutionContext, Issue, IssueSeverity, MetricSample,
    MetricsSource, Notification, NotificationKind, NotificationSender, Severity, Ticket,
    TicketKind, TicketSink,
};

/// Registered name
pub const MONITORING_AGENT: &str = "monitoring";

/// Alerts retained before the oldest settled ones are evicted
pub const MAX_ALERTS: usize = 1000;

/// Warning and critical tiers of one metric
///
/// When `critical < warning` lower values are worse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    #[must_use]
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    #[inline]
    #[must_use]
    pub fn lower_is_worse(&self) -> bool {
        self.critical < self.warning
    }

    /// Breached tier and its bound, if any
    #[must_use]
    pub fn evaluate(&self, value: f64) -> Option<(IssueSeverity, f64)> {
        let breached = |bound: f64| {
            if self.lower_is_worse() {
                value <= bound
            } else {
                value >= bound
            }
        };
        if breached(self.critical) {
            Some((IssueSeverity::Critical, self.critical))
        } else if breached(self.warning) {
            Some((IssueSeverity::Warning, self.warning))
        } else {
            None
        }
    }
}

/// Named metric source with thresholds
#[derive(Clone)]
pub struct Monitor {
    pub id: String,
    pub name: String,
    pub thresholds: IndexMap<String, Threshold>,
    source: Arc<dyn MetricsSource>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.id)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: Arc<dyn MetricsSource>,
        thresholds: &[(&str, Threshold)],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            thresholds: thresholds.iter().map(|(k, t)| ((*k).to_string(), *t)).collect(),
            source,
        }
    }

    pub fn performance(source: Arc<dyn MetricsSource>) -> Self {
        Self::new(
            "performance",
            "Performance Monitor",
            source,
            &[
                ("response_time", Threshold::new(1000.0, 5000.0)),
                ("throughput", Threshold::new(50.0, 10.0)),
                ("memory_usage", Threshold::new(80.0, 95.0)),
                ("cpu_usage", Threshold::new(70.0, 90.0)),
            ],
        )
    }

    pub fn error(source: Arc<dyn MetricsSource>) -> Self {
        Self::new(
            "error",
            "Error Monitor",
            source,
            &[
                ("error_rate", Threshold::new(5.0, 15.0)),
                ("exception_count", Threshold::new(10.0, 50.0)),
                ("timeout_count", Threshold::new(5.0, 20.0)),
            ],
        )
    }

    pub fn security(source: Arc<dyn MetricsSource>) -> Self {
        Self::new(
            "security",
            "Security Monitor",
            source,
            &[
                ("failed_logins", Threshold::new(5.0, 15.0)),
                ("suspicious_activity", Threshold::new(3.0, 10.0)),
                ("unauthorized_access", Threshold::new(1.0, 5.0)),
            ],
        )
    }

    pub fn business(source: Arc<dyn MetricsSource>) -> Self {
        Self::new(
            "business",
            "Business Logic Monitor",
            source,
            &[
                ("conversion_rate", Threshold::new(2.0, 1.0)),
                ("user_engagement", Threshold::new(30.0, 15.0)),
                ("data_quality", Threshold::new(85.0, 70.0)),
            ],
        )
    }

    /// Issues raised by `sample`; metrics without a threshold are ignored
    #[must_use]
    pub fn evaluate(&self, sample: &MetricSample) -> Vec<Issue> {
        let now = Utc::now();
        self.thresholds
            .iter()
            .filter_map(|(metric, threshold)| {
                let value = *sample.get(metric)?;
                let (severity, bound) = threshold.evaluate(value)?;
                Some(Issue {
                    monitor: self.id.clone(),
                    metric: metric.clone(),
                    value,
                    threshold: bound,
                    severity,
                    timestamp: now,
                })
            })
            .collect()
    }
}

/// Proposed remediation for a breached metric
#[must_use]
pub fn proposed_solution(monitor: &str, metric: &str) -> &'static str {
    match (monitor, metric) {
        ("performance", "response_time") => {
            "Implement response caching, optimize database queries, consider CDN integration"
        }
        ("performance", "throughput") => {
            "Scale horizontally, implement load balancing, optimize resource usage"
        }
        ("performance", "memory_usage") => {
            "Implement memory leak detection, optimize data structures, add garbage collection"
        }
        ("performance", "cpu_usage") => {
            "Profile code performance, optimize algorithms, consider async processing"
        }
        ("error", "error_rate") => {
            "Implement circuit breaker pattern, add retry logic, improve error handling"
        }
        ("error", "exception_count") => {
            "Add comprehensive error logging, implement graceful degradation"
        }
        ("error", "timeout_count") => {
            "Increase timeout thresholds, optimize slow operations, implement async processing"
        }
        ("security", "failed_logins") => "Implement rate limiting, add CAPTCHA, enhance authentication",
        ("security", "suspicious_activity") => {
            "Strengthen monitoring, implement anomaly detection, add security alerts"
        }
        ("security", "unauthorized_access") => "Review permissions, implement RBAC, add audit logging",
        ("business", "conversion_rate") => "A/B testing, UI/UX improvements, optimize conversion funnel",
        ("business", "user_engagement") => "Personalization, gamification, content optimization",
        ("business", "data_quality") => "Data validation, cleansing pipelines, quality monitoring",
        _ => "General system optimization and monitoring enhancement",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub issue: Issue,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub false_positive: Option<bool>,
}

/// Immediate response to a critical issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mitigation {
    MemoryOptimization,
    CircuitBreaker,
    SecurityLockdown,
}

impl Mitigation {
    /// Mitigation for a critical breach, if the monitor has one
    #[must_use]
    pub fn for_issue(issue: &Issue) -> Option<Self> {
        match (issue.monitor.as_str(), issue.metric.as_str()) {
            ("performance", "memory_usage") => Some(Mitigation::MemoryOptimization),
            ("error", "error_rate") => Some(Mitigation::CircuitBreaker),
            ("security", _) => Some(Mitigation::SecurityLockdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MitigationRecord {
    pub mitigation: Mitigation,
    pub issue: Issue,
    pub triggered_at: DateTime<Utc>,
}

/// Latest reading of one monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub values: MetricSample,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ThresholdFeedback {
    false_positives: u32,
    true_positives: u32,
}

#[derive(Debug, Default)]
struct MonitoringState {
    alerts: IndexMap<String, Alert>,
    latest: IndexMap<String, MetricSnapshot>,
    mitigations: Vec<MitigationRecord>,
    feedback: HashMap<(String, String), ThresholdFeedback>,
}

impl MonitoringState {
    fn insert_alert(&mut self, alert: Alert) {
        self.alerts.insert(alert.id.clone(), alert);
        while self.alerts.len() > MAX_ALERTS {
            let victim = self
                .alerts
                .iter()
                .position(|(_, a)| a.status != AlertStatus::Active)
                .unwrap_or(0);
            self.alerts.shift_remove_index(victim);
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct CycleReport {
    monitors: Vec<String>,
    issues: Vec<Issue>,
    failed_monitors: Vec<String>,
    new_alerts: usize,
    active_alerts: usize,
    tickets: usize,
    mitigations: Vec<Mitigation>,
}

/// Threshold-based metric watcher
pub struct MonitoringAgent {
    runtime: AgentRuntime,
    period: Duration,
    monitors: RwLock<IndexMap<String, Monitor>>,
    notifier: Arc<dyn NotificationSender>,
    tickets: Option<Arc<dyn TicketSink>>,
    state: Mutex<MonitoringState>,
}

impl std::fmt::Debug for MonitoringAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringAgent")
            .field("runtime", &self.runtime)
            .field("monitors", &self.monitors.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MonitoringAgent {
    #[must_use]
    pub fn new(period: Duration, notifier: Arc<dyn NotificationSender>) -> Self {
        let descriptor =
            AgentDescriptor::new(MONITORING_AGENT, AgentCategory::Monitoring, AutonomyLevel::Full)
                .with_description("Threshold alerting with evolution tickets for critical issues");
        Self {
            runtime: AgentRuntime::new(descriptor),
            period,
            monitors: RwLock::new(IndexMap::new()),
            notifier,
            tickets: None,
            state: Mutex::new(MonitoringState::default()),
        }
    }

    /// With a monitor; replaces one with the same id
    #[must_use]
    pub fn with_monitor(self, monitor: Monitor) -> Self {
        self.monitors.write().insert(monitor.id.clone(), monitor);
        self
    }

    /// With the sink receiving evolution tickets
    #[must_use]
    pub fn with_ticket_sink(mut self, sink: Arc<dyn TicketSink>) -> Self {
        self.tickets = Some(sink);
        self
    }

    #[must_use]
    pub fn monitor_ids(&self) -> Vec<String> {
        self.monitors.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn threshold(&self, monitor: &str, metric: &str) -> Option<Threshold> {
        self.monitors.read().get(monitor)?.thresholds.get(metric).copied()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.state.lock().alerts.values().cloned().collect()
    }

    #[must_use]
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state
            .lock()
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn latest_metrics(&self) -> IndexMap<String, MetricSnapshot> {
        self.state.lock().latest.clone()
    }

    #[must_use]
    pub fn mitigations(&self) -> Vec<MitigationRecord> {
        self.state.lock().mitigations.clone()
    }

    /// Settle an active alert; `false_positive` feeds threshold learning
    pub fn resolve_alert(&self, id: &str, false_positive: bool) -> bool {
        let mut state = self.state.lock();
        let Some(alert) = state.alerts.get_mut(id) else {
            return false;
        };
        if alert.status != AlertStatus::Active {
            return false;
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        alert.false_positive = Some(false_positive);
        let key = (alert.issue.monitor.clone(), alert.issue.metric.clone());

        let feedback = state.feedback.entry(key).or_default();
        if false_positive {
            feedback.false_positives += 1;
        } else {
            feedback.true_positives += 1;
        }
        true
    }

    /// Silence an active alert
    pub fn suppress_alert(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.alerts.get_mut(id) {
            Some(alert) if alert.status == AlertStatus::Active => {
                alert.status = AlertStatus::Suppressed;
                true
            }
            _ => false,
        }
    }

    async fn process_issue(&self, issue: &Issue, report: &mut CycleReport) {
        tracing::info!(
            monitor = %issue.monitor,
            metric = %issue.metric,
            value = issue.value,
            severity = %issue.severity,
            "threshold breached"
        );
        let id = format!(
            "alert_{}_{}_{}",
            issue.monitor,
            issue.metric,
            issue.timestamp.timestamp_millis()
        );
        {
            let mut state = self.state.lock();
            if state.alerts.contains_key(&id) {
                return;
            }
            state.insert_alert(Alert {
                id: id.clone(),
                issue: issue.clone(),
                status: AlertStatus::Active,
                created_at: Utc::now(),
                resolved_at: None,
                false_positive: None,
            });
        }
        report.new_alerts += 1;
        metrics::counter!("warden_monitoring_alerts_total", "monitor" => issue.monitor.clone()).increment(1);
        self.runtime.raise_alert(json!({ "alert_id": id, "issue": issue })).await;

        if issue.severity != IssueSeverity::Critical {
            return;
        }
        if self.submit_evolution_ticket(issue) {
            report.tickets += 1;
        }
        if let Some(mitigation) = Mitigation::for_issue(issue) {
            self.mitigate(mitigation, issue).await;
            report.mitigations.push(mitigation);
        }
    }

    fn submit_evolution_ticket(&self, issue: &Issue) -> bool {
        let Some(sink) = &self.tickets else {
            tracing::debug!(monitor = %issue.monitor, "no ticket sink attached");
            return false;
        };
        let ticket = Ticket::new(
            TicketKind::AutomatedEvolution,
            format!("Critical Issue Detected: {} - {}", issue.monitor, issue.metric),
            proposed_solution(&issue.monitor, &issue.metric),
        )
        .with_description(format!(
            "Automated monitoring detected a critical issue requiring evolution.\n\
             - Monitor: {}\n- Metric: {}\n- Value: {}\n- Threshold: {}\n- Severity: {}",
            issue.monitor, issue.metric, issue.value, issue.threshold, issue.severity
        ))
        .with_issue(issue.clone());
        tracing::info!(ticket = %ticket.id, "evolution ticket generated");
        sink.submit_ticket(ticket);
        true
    }

    async fn mitigate(&self, mitigation: Mitigation, issue: &Issue) {
        tracing::warn!(?mitigation, monitor = %issue.monitor, metric = %issue.metric, "critical response triggered");
        if mitigation == Mitigation::SecurityLockdown {
            let notification = Notification::new(
                NotificationKind::Security,
                Severity::Critical,
                "Security Lockdown Activated",
                format!(
                    "Critical security issue detected: {}. Security measures activated.",
                    issue.metric
                ),
            )
            .with_details(json!({ "metric": issue.metric, "value": issue.value }));
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }
        self.state.lock().mitigations.push(MitigationRecord {
            mitigation,
            issue: issue.clone(),
            triggered_at: Utc::now(),
        });
    }

    async fn run_monitors(&self) -> Result<AgentResult, AgentError> {
        let monitors: Vec<Monitor> = self.monitors.read().values().cloned().collect();
        let mut report = CycleReport::default();

        for monitor in monitors {
            report.monitors.push(monitor.id.clone());
            let sample = match monitor.source.collect().await {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::error!(monitor = %monitor.name, error = %e, "monitor failed");
                    self.runtime.record_error();
                    report.failed_monitors.push(monitor.id.clone());
                    continue;
                }
            };

            let issues = monitor.evaluate(&sample);
            self.state.lock().latest.insert(
                monitor.id.clone(),
                MetricSnapshot {
                    values: sample,
                    collected_at: Utc::now(),
                },
            );
            for issue in issues {
                self.process_issue(&issue, &mut report).await;
                report.issues.push(issue);
            }
        }

        report.active_alerts = self
            .state
            .lock()
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Active)
            .count();
        Ok(AgentResult::ok(json!(report)))
    }
}

#[async_trait::async_trait]
impl Agent for MonitoringAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.period)
    }

    async fn execute(&self, _context: ExecutionContext) -> AgentResult {
        self.runtime.run_cycle(self.run_monitors()).await
    }

    fn can_handle(&self, _context: &ExecutionContext) -> bool {
        true
    }

    fn requires_hil(&self, _context: &ExecutionContext) -> bool {
        false
    }

    /// Loosen thresholds that mostly raise false positives
    async fn adapt_strategy(&self) {
        let noisy: Vec<(String, String)> = {
            let mut state = self.state.lock();
            let mut noisy = Vec::new();
            for (key, fb) in &mut state.feedback {
                let total = fb.false_positives + fb.true_positives;
                if total >= 10 {
                    if f64::from(fb.false_positives) / f64::from(total) > 0.3 {
                        noisy.push(key.clone());
                    }
                    *fb = ThresholdFeedback::default();
                }
            }
            noisy
        };

        let mut changes = serde_json::Map::new();
        {
            let mut monitors = self.monitors.write();
            for (monitor, metric) in noisy {
                let Some(t) = monitors.get_mut(&monitor).and_then(|m| m.thresholds.get_mut(&metric)) else {
                    continue;
                };
                let factor = if t.lower_is_worse() { 0.9 } else { 1.1 };
                t.warning *= factor;
                changes.insert(format!("{monitor}.{metric}.warning"), json!(t.warning));
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
    use warden_test_utils::ScriptedMetrics;

    fn agent() -> MonitoringAgent {
        MonitoringAgent::new(Duration::from_secs(30), Arc::new(warden_core::LogNotifier))
            .with_monitor(Monitor::performance(ScriptedMetrics::constant(&[])))
    }

    fn issue(metric: &str, value: f64, offset_ms: i64) -> Issue {
        Issue {
            monitor: "performance".into(),
            metric: metric.into(),
            value,
            threshold: 70.0,
            severity: IssueSeverity::Warning,
            timestamp: Utc::now() + chrono::Duration::milliseconds(offset_ms),
        }
    }

    async fn raise(agent: &MonitoringAgent, issue: &Issue) -> String {
        agent.process_issue(issue, &mut CycleReport::default()).await;
        agent.alerts().last().map(|a| a.id.clone()).unwrap_or_default()
    }

    async fn settle(agent: &MonitoringAgent, metric: &str, false_positives: usize, total: usize) {
        for n in 0..total {
            let id = raise(agent, &issue(metric, 75.0, n as i64)).await;
            assert!(agent.resolve_alert(&id, n < false_positives));
        }
    }

    #[tokio::test]
    async fn resolve_and_suppress_only_touch_active_alerts() {
        let agent = agent();
        let first = raise(&agent, &issue("cpu_usage", 75.0, 0)).await;
        let second = raise(&agent, &issue("cpu_usage", 76.0, 1)).await;
        assert_eq!(agent.active_alerts().len(), 2);

        assert!(agent.suppress_alert(&first));
        assert!(!agent.suppress_alert(&first));
        assert!(!agent.resolve_alert(&first, true));

        assert!(agent.resolve_alert(&second, false));
        assert!(!agent.resolve_alert(&second, false));
        assert!(!agent.resolve_alert("alert_missing", false));
        assert!(!agent.suppress_alert("alert_missing"));

        let alerts = agent.alerts();
        assert_eq!(alerts[0].status, AlertStatus::Suppressed);
        assert_eq!(alerts[0].false_positive, None);
        assert_eq!(alerts[1].status, AlertStatus::Resolved);
        assert_eq!(alerts[1].false_positive, Some(false));
        assert!(alerts[1].resolved_at.is_some());
        assert!(agent.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn repeated_issue_keeps_one_alert() {
        let agent = agent();
        let breach = issue("cpu_usage", 80.0, 0);
        let mut report = CycleReport::default();

        agent.process_issue(&breach, &mut report).await;
        agent.process_issue(&breach, &mut report).await;

        assert_eq!(report.new_alerts, 1);
        assert_eq!(agent.alerts().len(), 1);
        assert_eq!(
            agent.alerts()[0].id,
            format!("alert_performance_cpu_usage_{}", breach.timestamp.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn noisy_threshold_widens_then_feedback_resets() {
        let agent = agent();
        settle(&agent, "cpu_usage", 4, 10).await;
        settle(&agent, "throughput", 4, 10).await;

        agent.adapt_strategy().await;
        let cpu = agent.threshold("performance", "cpu_usage").unwrap();
        assert!((cpu.warning - 77.0).abs() < 1e-9);
        assert_eq!(cpu.critical, 90.0);
        let throughput = agent.threshold("performance", "throughput").unwrap();
        assert!((throughput.warning - 45.0).abs() < 1e-9);

        // feedback was consumed by the first pass
        agent.adapt_strategy().await;
        let cpu = agent.threshold("performance", "cpu_usage").unwrap();
        assert!((cpu.warning - 77.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn thresholds_hold_without_enough_noise() {
        let agent = agent();
        settle(&agent, "cpu_usage", 3, 10).await;
        settle(&agent, "memory_usage", 5, 9).await;

        agent.adapt_strategy().await;

        assert_eq!(agent.threshold("performance", "cpu_usage").unwrap().warning, 70.0);
        assert_eq!(agent.threshold("performance", "memory_usage").unwrap().warning, 80.0);
    }

    #[test]
    fn lower_is_worse_inferred_from_tiers() {
        let throughput = Threshold::new(50.0, 10.0);
        assert!(throughput.lower_is_worse());
        assert_eq!(throughput.evaluate(5.0), Some((IssueSeverity::Critical, 10.0)));
        assert_eq!(throughput.evaluate(30.0), Some((IssueSeverity::Warning, 50.0)));
        assert_eq!(throughput.evaluate(80.0), None);

        let cpu = Threshold::new(70.0, 90.0);
        assert_eq!(cpu.evaluate(90.0), Some((IssueSeverity::Critical, 90.0)));
        assert_eq!(cpu.evaluate(70.0), Some((IssueSeverity::Warning, 70.0)));
        assert_eq!(cpu.evaluate(69.9), None);
    }

    #[test]
    fn solutions_fall_back_to_generic() {
        assert!(proposed_solution("error", "error_rate").contains("circuit breaker"));
        assert_eq!(
            proposed_solution("disk", "iops"),
            "General system optimization and monitoring enhancement"
        );
    }

    #[test]
    fn mitigations_by_monitor() {
        let mut issue = Issue {
            monitor: "security".into(),
            metric: "failed_logins".into(),
            value: 20.0,
            threshold: 15.0,
            severity: IssueSeverity::Critical,
            timestamp: Utc::now(),
        };
        assert_eq!(Mitigation::for_issue(&issue), Some(Mitigation::SecurityLockdown));
        issue.monitor = "performance".into();
        assert_eq!(Mitigation::for_issue(&issue), None);
        issue.metric = "memory_usage".into();
        assert_eq!(Mitigation::for_issue(&issue), Some(Mitigation::MemoryOptimization));
    }
}
