//! Agent registry
//!
//! Owns the unique-name catalog and drives lifecycle across it:
//! - `register` initializes before inserting; `unregister` cleans up before removing
//! - Bulk `start_all` / `stop_all` isolate per-agent failures
//! - `health_check` never fails: an unreadable status becomes a synthetic
//!   unhealthy entry
//!
//! The catalog lock is never held across an await point.

use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use warden_bus::{AgentEvent, EventBus, EventKind};
use warden_core::{
    launch, Agent, AgentStatusSnapshot, HealthStatus, HilBroker, PeriodicHandle, Scheduler,
};

/// Outcome of a bulk lifecycle call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub succeeded: Vec<String>,
    /// Agent name and error message
    pub failed: Vec<(String, String)>,
}

impl LifecycleReport {
    #[inline]
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Aggregate health across the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    /// Worst status across all agents
    pub overall: HealthStatus,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub agents: IndexMap<String, AgentStatusSnapshot>,
}

impl HealthReport {
    fn from_snapshots(agents: IndexMap<String, AgentStatusSnapshot>) -> Self {
        let count = |status: HealthStatus| agents.values().filter(|s| s.health == status).count();
        Self {
            generated_at: Utc::now(),
            overall: HealthStatus::worst_of(agents.values().map(|s| s.health)),
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            agents,
        }
    }
}

/// Catalog of agent instances
pub struct AgentRegistry {
    agents: RwLock<IndexMap<String, Arc<dyn Agent>>>,
    bus: EventBus,
    scheduler: Arc<dyn Scheduler>,
    hil: Option<Arc<dyn HilBroker>>,
    latest: RwLock<Option<HealthReport>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .field("bus", &self.bus)
            .field("has_hil", &self.hil.is_some())
            .finish_non_exhaustive()
    }
}

impl AgentRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new(bus: EventBus, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            agents: RwLock::new(IndexMap::new()),
            bus,
            scheduler,
            hil: None,
            latest: RwLock::new(None),
        }
    }

    /// With HIL broker attached to every agent registered afterwards
    #[inline]
    #[must_use]
    pub fn with_hil(mut self, broker: Arc<dyn HilBroker>) -> Self {
        self.hil = Some(broker);
        self
    }

    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register an agent
    ///
    /// Fails with [`RegistryError::DuplicateAgent`] without touching the
    /// catalog if the name is taken, and with
    /// [`RegistryError::Initialization`] if `initialize` fails.
    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        if self.contains(&name) {
            return Err(RegistryError::DuplicateAgent(name));
        }

        if !agent.runtime().attach_bus(self.bus.clone()) {
            tracing::warn!(agent = %name, "agent already has a bus; its events bypass the registry bus");
        }
        if let Some(hil) = &self.hil {
            if !agent.runtime().attach_hil(Arc::clone(hil)) {
                tracing::warn!(agent = %name, "agent already has a HIL broker; keeping it");
            }
        }

        agent
            .initialize()
            .await
            .map_err(|source| RegistryError::Initialization {
                name: name.clone(),
                source,
            })?;

        {
            let mut agents = self.agents.write();
            if agents.contains_key(&name) {
                return Err(RegistryError::DuplicateAgent(name));
            }
            agents.insert(name.clone(), Arc::clone(&agent));
            metrics::gauge!("warden_registry_agents").set(agents.len() as f64);
        }

        let descriptor = agent.descriptor();
        tracing::info!(agent = %name, category = ?descriptor.category, "agent registered");
        self.bus
            .emit(
                AgentEvent::new(EventKind::AgentRegistered, name).with_data(json!({
                    "category": descriptor.category,
                    "autonomy": descriptor.autonomy,
                })),
            )
            .await;
        Ok(())
    }

    /// Clean up and remove an agent
    ///
    /// A failing `cleanup` is logged; the agent is removed regardless.
    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let agent = self.require(name)?;

        if let Err(e) = agent.cleanup().await {
            tracing::warn!(agent = %name, error = %e, "cleanup failed during unregister");
        }

        {
            let mut agents = self.agents.write();
            agents.shift_remove(name);
            metrics::gauge!("warden_registry_agents").set(agents.len() as f64);
        }

        tracing::info!(agent = %name, "agent unregistered");
        self.bus
            .emit(AgentEvent::new(EventKind::AgentUnregistered, name))
            .await;
        Ok(())
    }

    /// Start one agent and attach its periodic loop
    pub async fn start(&self, name: &str) -> Result<(), RegistryError> {
        let agent = self.require(name)?;
        launch(agent, Arc::clone(&self.scheduler))
            .await
            .map_err(|source| RegistryError::Agent {
                name: name.to_string(),
                source,
            })
    }

    /// Stop one agent
    pub async fn stop(&self, name: &str) -> Result<(), RegistryError> {
        let agent = self.require(name)?;
        agent.stop().await.map_err(|source| RegistryError::Agent {
            name: name.to_string(),
            source,
        })
    }

    /// Start every agent in registration order; one failure does not stop the rest
    pub async fn start_all(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for (name, agent) in self.snapshot() {
            let outcome = AssertUnwindSafe(launch(agent, Arc::clone(&self.scheduler)))
                .catch_unwind()
                .await;
            Self::tally(&mut report, name, "start", outcome);
        }
        tracing::info!(
            started = report.succeeded.len(),
            failed = report.failed.len(),
            "start_all finished"
        );
        report
    }

    /// Stop every agent; one failure does not stop the rest
    pub async fn stop_all(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for (name, agent) in self.snapshot() {
            let outcome = AssertUnwindSafe(agent.stop()).catch_unwind().await;
            Self::tally(&mut report, name, "stop", outcome);
        }
        tracing::info!(
            stopped = report.succeeded.len(),
            failed = report.failed.len(),
            "stop_all finished"
        );
        report
    }

    fn tally(
        report: &mut LifecycleReport,
        name: String,
        verb: &str,
        outcome: std::thread::Result<Result<(), warden_core::AgentError>>,
    ) {
        match outcome {
            Ok(Ok(())) => report.succeeded.push(name),
            Ok(Err(e)) => {
                tracing::error!(agent = %name, verb, error = %e, "lifecycle verb failed");
                report.failed.push((name, e.to_string()));
            }
            Err(_) => {
                tracing::error!(agent = %name, verb, "lifecycle verb panicked");
                report.failed.push((name, format!("{verb} panicked")));
            }
        }
    }

    /// Status of every agent, in registration order
    #[must_use]
    pub fn health_check(&self) -> IndexMap<String, AgentStatusSnapshot> {
        self.snapshot()
            .into_iter()
            .map(|(name, agent)| {
                let status = std::panic::catch_unwind(AssertUnwindSafe(|| agent.status()))
                    .unwrap_or_else(|_| {
                        tracing::error!(agent = %name, "status read panicked");
                        AgentStatusSnapshot::unreachable(name.clone(), "status read failed")
                    });
                (name, status)
            })
            .collect()
    }

    /// Aggregate health and remember it as the latest report
    pub fn health_report(&self) -> HealthReport {
        let report = HealthReport::from_snapshots(self.health_check());
        if report.overall != HealthStatus::Healthy {
            tracing::warn!(
                overall = %report.overall,
                degraded = report.degraded,
                unhealthy = report.unhealthy,
                "registry health below healthy"
            );
        }
        *self.latest.write() = Some(report.clone());
        report
    }

    /// Most recent report from [`Self::health_report`] or the health monitor
    #[must_use]
    pub fn latest_report(&self) -> Option<HealthReport> {
        self.latest.read().clone()
    }

    /// Poll aggregate health every `period` until the handle is cancelled
    pub fn spawn_health_monitor(self: &Arc<Self>, period: Duration) -> PeriodicHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.spawn_periodic(
            "registry-health",
            period,
            Arc::new(move || {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(registry) = weak.upgrade() {
                        registry.health_report();
                    }
                }) as futures::future::BoxFuture<'static, ()>
            }),
        )
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    /// Names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    fn require(&self, name: &str) -> Result<Arc<dyn Agent>, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::AgentNotFound(name.to_string()))
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn Agent>)> {
        self.agents
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}
