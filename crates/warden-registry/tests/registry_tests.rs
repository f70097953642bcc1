//! Registry catalog and lifecycle tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_bus::{EventBus, EventKind};
use warden_core::{
    Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult, AgentRuntime, AgentState,
    AgentStatusSnapshot, AutonomyLevel, ExecutionContext, HealthStatus, ManualScheduler,
};
use warden_registry::{AgentRegistry, RegistryError};
use warden_test_utils::count_events;

#[derive(Default)]
struct Behaviour {
    fail_init: bool,
    fail_start: bool,
    panic_status: bool,
    fail_execute: bool,
}

struct TestAgent {
    runtime: AgentRuntime,
    behaviour: Behaviour,
    cleaned_up: AtomicBool,
    runs: AtomicUsize,
}

impl TestAgent {
    fn new(name: &str, category: AgentCategory, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            runtime: AgentRuntime::new(AgentDescriptor::new(name, category, AutonomyLevel::Full)),
            behaviour,
            cleaned_up: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        })
    }

    fn plain(name: &str) -> Arc<Self> {
        Self::new(name, AgentCategory::Monitoring, Behaviour::default())
    }
}

#[async_trait]
impl Agent for TestAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        if self.behaviour.fail_init {
            return Err(AgentError::Initialization("no credentials".into()));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), AgentError> {
        if self.behaviour.fail_start {
            return Err(AgentError::Execution("port in use".into()));
        }
        self.runtime.start().await.map(|_| ())
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.cleaned_up.store(true, Ordering::SeqCst);
        self.runtime.stop().await
    }

    async fn execute(&self, _context: ExecutionContext) -> AgentResult {
        self.runtime
            .run_cycle(async {
                self.runs.fetch_add(1, Ordering::SeqCst);
                if self.behaviour.fail_execute {
                    return Err(AgentError::Execution("tick failed".into()));
                }
                Ok(AgentResult::ok(serde_json::Value::Null))
            })
            .await
    }

    fn status(&self) -> AgentStatusSnapshot {
        if self.behaviour.panic_status {
            panic!("status unavailable");
        }
        self.runtime.snapshot()
    }

    fn can_handle(&self, _context: &ExecutionContext) -> bool {
        true
    }

    fn requires_hil(&self, _context: &ExecutionContext) -> bool {
        false
    }
}

fn registry() -> (Arc<AgentRegistry>, Arc<ManualScheduler>, EventBus) {
    let bus = EventBus::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let registry = Arc::new(AgentRegistry::new(bus.clone(), scheduler.clone()));
    (registry, scheduler, bus)
}

#[tokio::test]
async fn duplicate_registration_leaves_catalog_untouched() {
    let (registry, _, bus) = registry();
    let first = TestAgent::new("monitor", AgentCategory::Monitoring, Behaviour::default());
    let second = TestAgent::new("monitor", AgentCategory::Security, Behaviour::default());

    registry.register(first).await.unwrap();
    let err = registry.register(second).await.unwrap_err();

    assert!(matches!(err, RegistryError::DuplicateAgent(ref n) if n == "monitor"));
    assert_eq!(registry.len(), 1);
    let kept = registry.get("monitor").unwrap();
    assert_eq!(kept.descriptor().category, AgentCategory::Monitoring);
    assert_eq!(count_events(&bus, EventKind::AgentRegistered), 1);
}

#[tokio::test]
async fn failing_initializer_prevents_registration() {
    let (registry, _, bus) = registry();
    let agent = TestAgent::new(
        "broken",
        AgentCategory::Processing,
        Behaviour {
            fail_init: true,
            ..Behaviour::default()
        },
    );

    let err = registry.register(agent).await.unwrap_err();

    assert!(matches!(err, RegistryError::Initialization { .. }));
    assert!(registry.is_empty());
    assert_eq!(count_events(&bus, EventKind::AgentRegistered), 0);
}

#[tokio::test]
async fn start_all_isolates_failures() {
    let (registry, scheduler, _) = registry();
    registry.register(TestAgent::plain("a")).await.unwrap();
    registry
        .register(TestAgent::new(
            "b",
            AgentCategory::Decision,
            Behaviour {
                fail_start: true,
                ..Behaviour::default()
            },
        ))
        .await
        .unwrap();
    registry.register(TestAgent::plain("c")).await.unwrap();

    let report = registry.start_all().await;

    assert_eq!(report.succeeded, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b");
    assert_eq!(registry.get("c").unwrap().runtime().state(), AgentState::Running);
    assert_eq!(scheduler.job_count(), 2);

    let stopped = registry.stop_all().await;
    assert!(stopped.all_succeeded());
    assert_eq!(scheduler.job_count(), 0);
}

#[tokio::test]
async fn health_check_substitutes_unhealthy_for_panicking_status() {
    let (registry, _, _) = registry();
    registry.register(TestAgent::plain("ok")).await.unwrap();
    registry
        .register(TestAgent::new(
            "flaky",
            AgentCategory::Monitoring,
            Behaviour {
                panic_status: true,
                ..Behaviour::default()
            },
        ))
        .await
        .unwrap();
    registry.start("ok").await.unwrap();

    let health = registry.health_check();

    assert_eq!(health.len(), 2);
    assert_eq!(health["ok"].health, HealthStatus::Healthy);
    assert_eq!(health["flaky"].health, HealthStatus::Unhealthy);
    assert_eq!(health["flaky"].last_error.as_deref(), Some("status read failed"));
}

#[tokio::test]
async fn unregister_cleans_up_and_emits() {
    let (registry, _, bus) = registry();
    let agent = TestAgent::plain("gone");
    registry.register(agent.clone()).await.unwrap();

    registry.unregister("gone").await.unwrap();

    assert!(agent.cleaned_up.load(Ordering::SeqCst));
    assert!(!registry.contains("gone"));
    assert_eq!(count_events(&bus, EventKind::AgentUnregistered), 1);
    assert!(matches!(
        registry.unregister("gone").await,
        Err(RegistryError::AgentNotFound(_))
    ));
}

#[tokio::test]
async fn health_monitor_records_worst_of_report() {
    let (registry, scheduler, _) = registry();
    registry.register(TestAgent::plain("healthy")).await.unwrap();
    registry
        .register(TestAgent::new(
            "failing",
            AgentCategory::Remediation,
            Behaviour {
                fail_execute: true,
                ..Behaviour::default()
            },
        ))
        .await
        .unwrap();
    registry.register(TestAgent::plain("idle")).await.unwrap();
    registry.start("healthy").await.unwrap();
    registry.start("failing").await.unwrap();

    let _monitor = registry.spawn_health_monitor(Duration::from_secs(60));
    scheduler.tick_all().await;

    let report = registry.latest_report().unwrap();
    assert_eq!(report.overall, HealthStatus::Unhealthy);
    assert_eq!(report.healthy, 1);
    assert_eq!(report.degraded, 1);
    assert_eq!(report.unhealthy, 1);
    assert_eq!(
        report.agents.keys().cloned().collect::<Vec<_>>(),
        vec!["healthy", "failing", "idle"]
    );
}

#[tokio::test]
async fn registration_attaches_bus_to_agent() {
    let (registry, _, bus) = registry();
    let agent = TestAgent::plain("wired");
    registry.register(agent.clone()).await.unwrap();

    agent.execute(ExecutionContext::manual()).await;
    let kinds: Vec<EventKind> = bus
        .history(Some("wired"), None)
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![EventKind::AgentRegistered, EventKind::ExecutionStart, EventKind::ExecutionComplete]
    );
}

#[tokio::test]
async fn agent_with_its_own_bus_still_registers() {
    let (registry, _, bus) = registry();
    let private = EventBus::new();
    let agent = TestAgent::plain("loner");
    assert!(agent.runtime().attach_bus(private.clone()));

    registry.register(agent.clone()).await.unwrap();
    assert!(registry.contains("loner"));
    assert_eq!(count_events(&bus, EventKind::AgentRegistered), 1);

    agent.execute(ExecutionContext::manual()).await;
    assert_eq!(count_events(&private, EventKind::ExecutionComplete), 1);
    assert_eq!(count_events(&bus, EventKind::ExecutionComplete), 0);
}
