//! Lifecycle, scheduling and configuration tests

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_bus::{EventBus, EventKind};
use warden_core::state_machine::{allowed_transitions, validate_transition};
use warden_core::{
    launch, Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult, AgentRuntime,
    AgentState, AutonomyLevel, ExecutionContext, HealthStatus, ManualScheduler, WardenConfig,
};

struct CountingAgent {
    runtime: AgentRuntime,
    runs: AtomicUsize,
    adaptations: AtomicUsize,
    period_ms: AtomicU64,
    fail_on: Option<usize>,
}

impl CountingAgent {
    fn new(bus: &EventBus, fail_on: Option<usize>) -> Self {
        Self {
            runtime: AgentRuntime::new(AgentDescriptor::new(
                "counter",
                AgentCategory::Processing,
                AutonomyLevel::Full,
            ))
            .with_bus(bus.clone()),
            runs: AtomicUsize::new(0),
            adaptations: AtomicUsize::new(0),
            period_ms: AtomicU64::new(1_000),
            fail_on,
        }
    }
}

#[async_trait]
impl Agent for CountingAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.period_ms.load(Ordering::SeqCst)))
    }

    async fn execute(&self, _context: ExecutionContext) -> AgentResult {
        self.runtime
            .run_cycle(async {
                let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
                if Some(n) == self.fail_on {
                    return Err(AgentError::Execution(format!("run {n} failed")));
                }
                Ok(AgentResult::ok(json!({ "run": n })))
            })
            .await
    }

    fn can_handle(&self, _context: &ExecutionContext) -> bool {
        true
    }

    fn requires_hil(&self, _context: &ExecutionContext) -> bool {
        false
    }

    async fn adapt_strategy(&self) {
        self.adaptations.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn launch_attaches_one_timer_and_stop_cancels_it() {
    let bus = EventBus::new();
    let agent = Arc::new(CountingAgent::new(&bus, None));
    let scheduler = Arc::new(ManualScheduler::new());

    launch(agent.clone(), scheduler.clone()).await.unwrap();
    launch(agent.clone(), scheduler.clone()).await.unwrap();
    assert_eq!(scheduler.job_count(), 1);

    scheduler.tick_all().await;
    scheduler.tick_all().await;
    assert_eq!(agent.runs.load(Ordering::SeqCst), 2);

    agent.stop().await.unwrap();
    assert_eq!(scheduler.tick_all().await, 0);
    assert_eq!(agent.runtime().state(), AgentState::Stopped);
    assert_eq!(agent.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn each_tick_adapts_and_period_change_reattaches_timer() {
    let bus = EventBus::new();
    let agent = Arc::new(CountingAgent::new(&bus, None));
    let scheduler = Arc::new(ManualScheduler::new());
    launch(agent.clone(), scheduler.clone()).await.unwrap();
    assert_eq!(agent.runtime().timer_period(), Some(Duration::from_secs(1)));

    scheduler.tick_all().await;
    assert_eq!(agent.adaptations.load(Ordering::SeqCst), 1);
    assert_eq!(agent.runtime().timer_period(), Some(Duration::from_secs(1)));

    agent.period_ms.store(2_000, Ordering::SeqCst);
    scheduler.tick_all().await;
    assert_eq!(agent.runtime().timer_period(), Some(Duration::from_secs(2)));
    assert_eq!(scheduler.job_count(), 1);

    // the replaced job is gone, only the new one runs
    assert_eq!(scheduler.tick_all().await, 1);
    assert_eq!(agent.runs.load(Ordering::SeqCst), 3);
    assert_eq!(agent.adaptations.load(Ordering::SeqCst), 3);

    agent.stop().await.unwrap();
    assert_eq!(scheduler.tick_all().await, 0);
    assert_eq!(agent.runtime().timer_period(), None);
}

#[tokio::test]
async fn ticks_skipped_while_paused() {
    let bus = EventBus::new();
    let agent = Arc::new(CountingAgent::new(&bus, None));
    let scheduler = Arc::new(ManualScheduler::new());
    launch(agent.clone(), scheduler.clone()).await.unwrap();

    agent.pause().await.unwrap();
    scheduler.tick_all().await;
    assert_eq!(agent.runs.load(Ordering::SeqCst), 0);
    assert_eq!(agent.status().health, HealthStatus::Degraded);

    agent.resume().await.unwrap();
    scheduler.tick_all().await;
    assert_eq!(agent.runs.load(Ordering::SeqCst), 1);
    assert_eq!(agent.status().health, HealthStatus::Healthy);
}

#[tokio::test]
async fn failing_tick_marks_error_and_next_tick_recovers() {
    let bus = EventBus::new();
    let agent = Arc::new(CountingAgent::new(&bus, Some(1)));
    let scheduler = Arc::new(ManualScheduler::new());
    launch(agent.clone(), scheduler.clone()).await.unwrap();

    scheduler.tick_all().await;
    let status = agent.status();
    assert_eq!(status.state, AgentState::Error);
    assert_eq!(status.health, HealthStatus::Unhealthy);
    assert_eq!(status.metrics.errors, 1);

    scheduler.tick_all().await;
    assert_eq!(agent.runtime().state(), AgentState::Running);
    assert!((agent.metrics().success_rate - 0.5).abs() < f64::EPSILON);

    let failed = bus
        .history(Some("counter"), None)
        .into_iter()
        .filter(|e| e.kind == EventKind::ExecutionFailed)
        .count();
    assert_eq!(failed, 1);
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[bus]\nhistory_capacity = 50\n\n[hil]\nenabled = false").unwrap();

    let config = WardenConfig::load(file.path()).unwrap();
    assert_eq!(config.bus.history_capacity, 50);
    assert!(!config.hil.enabled);
    assert_eq!(config.agents.monitoring_interval_ms, 30_000);
}

#[test]
fn missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = WardenConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, warden_core::ConfigError::Io { .. }));
}

fn any_state() -> impl Strategy<Value = AgentState> {
    prop::sample::select(AgentState::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_validate_agrees_with_table(from in any_state(), to in any_state()) {
        let listed = allowed_transitions(from).contains(&to);
        prop_assert_eq!(validate_transition(from, to).is_ok(), listed);
    }

    #[test]
    fn prop_walks_stay_inside_state_set(steps in prop::collection::vec(any::<prop::sample::Index>(), 0..50)) {
        let mut state = AgentState::Idle;
        for step in steps {
            let next = allowed_transitions(state);
            let to = next[step.index(next.len())];
            prop_assert!(validate_transition(state, to).is_ok());
            state = to;
        }
        prop_assert!(AgentState::ALL.contains(&state));
    }

    #[test]
    fn prop_worst_of_dominates_every_member(statuses in prop::collection::vec(
        prop::sample::select(vec![HealthStatus::Healthy, HealthStatus::Degraded, HealthStatus::Unhealthy]),
        0..20,
    )) {
        let worst = HealthStatus::worst_of(statuses.iter().copied());
        for s in &statuses {
            prop_assert!(worst >= *s);
        }
    }
}
