//! Health-check agent
//!
//! Runs every registered [`HealthChecker`] concurrently and folds the results
//! into one status by worst-of. A checker that errors or panics counts as
//! unhealthy without affecting the others. An unhealthy overall status raises
//! an alert and a notification.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use warden_core::{
    notify_best_effort, Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult,
    AgentRuntime, AutonomyLevel, ExecutionContext, HealthProbe, HealthStatus, MetricsSource,
    Notification, NotificationKind, NotificationSender, Severity,
};

/// Registered name
pub const HEALTH_CHECK_AGENT: &str = "health-check";

/// Shortest period adaptation will recommend
pub const MIN_CHECK_PERIOD: Duration = Duration::from_secs(15);
/// Longest period adaptation will recommend
pub const MAX_CHECK_PERIOD: Duration = Duration::from_secs(300);

const FREQUENT_FAILURES: u32 = 3;
const CLEAN_STREAK: u32 = 10;

/// What a checker observed
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReading {
    pub status: HealthStatus,
    pub message: String,
    pub details: Value,
}

impl CheckReading {
    #[must_use]
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Value::Null,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// One named health check
#[async_trait::async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<CheckReading, AgentError>;
}

/// Dependency probe with a latency budget
pub struct ProbeChecker {
    name: String,
    probe: Arc<dyn HealthProbe>,
    latency_budget: Duration,
}

impl ProbeChecker {
    pub fn new(name: impl Into<String>, probe: Arc<dyn HealthProbe>, latency_budget: Duration) -> Self {
        Self {
            name: name.into(),
            probe,
            latency_budget,
        }
    }
}

#[async_trait::async_trait]
impl HealthChecker for ProbeChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<CheckReading, AgentError> {
        let reading = self.probe.probe().await?;
        let latency_ms = reading.latency.as_millis() as u64;
        let details = json!({ "latency_ms": latency_ms, "detail": reading.detail });
        if reading.latency > self.latency_budget {
            Ok(CheckReading::new(
                HealthStatus::Degraded,
                format!("slow response: {latency_ms}ms"),
            )
            .with_details(details))
        } else {
            Ok(CheckReading::new(HealthStatus::Healthy, "reachable").with_details(details))
        }
    }
}

/// CPU, memory and disk usage in percent
pub struct SystemResourceChecker {
    source: Arc<dyn MetricsSource>,
}

impl SystemResourceChecker {
    /// Metrics read from the source
    pub const RESOURCES: [&'static str; 3] = ["cpu_usage", "memory_usage", "disk_usage"];

    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }

    /// Classify one usage percentage
    #[must_use]
    pub fn classify(percent: f64) -> HealthStatus {
        if percent > 90.0 {
            HealthStatus::Unhealthy
        } else if percent > 75.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[async_trait::async_trait]
impl HealthChecker for SystemResourceChecker {
    fn name(&self) -> &str {
        "system_resources"
    }

    async fn check(&self) -> Result<CheckReading, AgentError> {
        let sample = self.source.collect().await?;
        let mut worst = HealthStatus::Healthy;
        let mut hot = Vec::new();
        for resource in Self::RESOURCES {
            let Some(&value) = sample.get(resource) else {
                continue;
            };
            let status = Self::classify(value);
            if status != HealthStatus::Healthy {
                hot.push(format!("{resource} at {value:.1}%"));
            }
            worst = worst.max(status);
        }
        let message = if hot.is_empty() {
            "resources within limits".to_string()
        } else {
            hot.join(", ")
        };
        Ok(CheckReading::new(worst, message).with_details(json!(sample)))
    }
}

/// Result of one checker in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub details: Value,
}

/// All checker results of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub overall: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub generated_at: DateTime<Utc>,
}

impl HealthSummary {
    #[must_use]
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        Self {
            overall: HealthStatus::worst_of(checks.iter().map(|c| c.status)),
            checks,
            generated_at: Utc::now(),
        }
    }
}

/// Failure history of one checker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckerLearning {
    pub occurrences: u32,
    pub recoveries: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct HealthState {
    period: Duration,
    learning: BTreeMap<String, CheckerLearning>,
    clean_streak: u32,
    last: Option<HealthSummary>,
}

/// Multi-checker health aggregation
pub struct HealthCheckAgent {
    runtime: AgentRuntime,
    checkers: Vec<Arc<dyn HealthChecker>>,
    notifier: Arc<dyn NotificationSender>,
    state: Mutex<HealthState>,
}

impl std::fmt::Debug for HealthCheckAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckAgent")
            .field("runtime", &self.runtime)
            .field("checkers", &self.checker_names())
            .finish_non_exhaustive()
    }
}

impl HealthCheckAgent {
    #[must_use]
    pub fn new(period: Duration, notifier: Arc<dyn NotificationSender>) -> Self {
        let descriptor =
            AgentDescriptor::new(HEALTH_CHECK_AGENT, AgentCategory::Monitoring, AutonomyLevel::Full)
                .with_description("Aggregates dependency and resource health");
        Self {
            runtime: AgentRuntime::new(descriptor),
            checkers: Vec::new(),
            notifier,
            state: Mutex::new(HealthState {
                period,
                learning: BTreeMap::new(),
                clean_streak: 0,
                last: None,
            }),
        }
    }

    #[must_use]
    pub fn with_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    #[must_use]
    pub fn checker_names(&self) -> Vec<String> {
        self.checkers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Summary of the latest cycle
    #[must_use]
    pub fn last_summary(&self) -> Option<HealthSummary> {
        self.state.lock().last.clone()
    }

    #[must_use]
    pub fn learning(&self) -> BTreeMap<String, CheckerLearning> {
        self.state.lock().learning.clone()
    }

    /// Period the agent currently recommends for itself
    #[must_use]
    pub fn recommended_period(&self) -> Duration {
        self.state.lock().period
    }

    async fn run_checker(checker: &dyn HealthChecker) -> CheckResult {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(checker.check()).catch_unwind().await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, message, details) = match outcome {
            Ok(Ok(r)) => (r.status, r.message, r.details),
            Ok(Err(e)) => (HealthStatus::Unhealthy, e.to_string(), Value::Null),
            Err(_) => {
                tracing::error!(checker = %checker.name(), "health checker panicked");
                (HealthStatus::Unhealthy, "checker panicked".to_string(), Value::Null)
            }
        };
        CheckResult {
            name: checker.name().to_string(),
            status,
            message,
            duration_ms,
            details,
        }
    }

    fn learn(&self, summary: &HealthSummary) {
        let mut state = self.state.lock();
        for check in &summary.checks {
            let entry = state.learning.entry(check.name.clone()).or_default();
            if check.status == HealthStatus::Healthy {
                if entry.consecutive_failures > 0 {
                    entry.recoveries += 1;
                }
                entry.consecutive_failures = 0;
            } else {
                entry.occurrences += 1;
                entry.consecutive_failures += 1;
            }
        }
        if summary.overall == HealthStatus::Healthy {
            state.clean_streak += 1;
        } else {
            state.clean_streak = 0;
        }
        state.last = Some(summary.clone());
    }

    async fn check_all(&self) -> Result<AgentResult, AgentError> {
        let checks = join_all(self.checkers.iter().map(|c| Self::run_checker(c.as_ref()))).await;
        let summary = HealthSummary::from_checks(checks);
        self.learn(&summary);

        tracing::debug!(overall = %summary.overall, checks = summary.checks.len(), "health cycle complete");
        if summary.overall == HealthStatus::Unhealthy {
            let failing: Vec<&str> = summary
                .checks
                .iter()
                .filter(|c| c.status == HealthStatus::Unhealthy)
                .map(|c| c.name.as_str())
                .collect();
            tracing::warn!(failing = ?failing, "system unhealthy");
            self.runtime
                .raise_alert(json!({ "overall": summary.overall, "failing": failing }))
                .await;
            let notification = Notification::new(
                NotificationKind::Health,
                Severity::High,
                "System Health Critical",
                format!("Unhealthy checks: {}", failing.join(", ")),
            )
            .with_details(json!(summary));
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }

        Ok(AgentResult::ok(json!(summary)))
    }
}

#[async_trait::async_trait]
impl Agent for HealthCheckAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.recommended_period())
    }

    async fn execute(&self, _context: ExecutionContext) -> AgentResult {
        self.runtime.run_cycle(self.check_all()).await
    }

    fn can_handle(&self, _context: &ExecutionContext) -> bool {
        true
    }

    fn requires_hil(&self, _context: &ExecutionContext) -> bool {
        false
    }

    /// Check more often while checkers keep failing, less often after a clean streak
    async fn adapt_strategy(&self) {
        let change = {
            let mut state = self.state.lock();
            let flapping = state
                .learning
                .values()
                .any(|l| l.consecutive_failures >= FREQUENT_FAILURES);
            let current = state.period;
            let next = if flapping {
                (current / 2).max(MIN_CHECK_PERIOD)
            } else if state.clean_streak >= CLEAN_STREAK {
                state.clean_streak = 0;
                current.mul_f64(1.5).min(MAX_CHECK_PERIOD)
            } else {
                current
            };
            state.period = next;
            (next != current).then_some((current, next))
        };

        if let Some((from, to)) = change {
            self.runtime
                .strategy_adapted(json!({
                    "period_ms": { "from": from.as_millis() as u64, "to": to.as_millis() as u64 }
                }))
                .await;
        }
    }
}
