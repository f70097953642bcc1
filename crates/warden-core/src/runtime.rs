//! Per-agent runtime state
//!
//! [`AgentRuntime`] owns everything the lifecycle contract needs so concrete
//! agents only implement their decision logic:
//! - Lifecycle state, validated against the state machine
//! - Rolling execution metrics
//! - Bus and HIL broker wiring
//! - The periodic timer handle attached by [`crate::scheduler::launch`]
//!
//! Locks are never held across an await point.

use crate::error::AgentError;
use crate::hil::{HilBroker, HilContext, HilResponse};
use crate::recorder::ExecutionRecorder;
use crate::scheduler::PeriodicHandle;
use crate::state_machine::validate_transition;
use crate::types::{
    AgentDescriptor, AgentMetrics, AgentResult, AgentState, AgentStatusSnapshot, HealthStatus,
};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use warden_bus::{AgentEvent, EventBus, EventKind};

#[derive(Debug)]
struct RuntimeInner {
    state: AgentState,
    /// Set by `start`, cleared by `stop`; decides where a failed agent recovers to
    activated: bool,
    recorder: ExecutionRecorder,
    last_error: Option<String>,
}

/// Shared lifecycle and metrics core embedded in every agent
pub struct AgentRuntime {
    descriptor: AgentDescriptor,
    inner: Mutex<RuntimeInner>,
    bus: OnceLock<EventBus>,
    hil: OnceLock<Arc<dyn HilBroker>>,
    timer: Mutex<Option<PeriodicHandle>>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AgentRuntime")
            .field("name", &self.descriptor.name)
            .field("state", &inner.state)
            .field("activated", &inner.activated)
            .field("has_bus", &self.bus.get().is_some())
            .field("has_hil", &self.hil.get().is_some())
            .finish_non_exhaustive()
    }
}

impl AgentRuntime {
    /// Create idle runtime
    #[must_use]
    pub fn new(descriptor: AgentDescriptor) -> Self {
        Self {
            descriptor,
            inner: Mutex::new(RuntimeInner {
                state: AgentState::Idle,
                activated: false,
                recorder: ExecutionRecorder::new(),
                last_error: None,
            }),
            bus: OnceLock::new(),
            hil: OnceLock::new(),
            timer: Mutex::new(None),
        }
    }

    /// With event bus
    #[must_use]
    pub fn with_bus(self, bus: EventBus) -> Self {
        self.attach_bus(bus);
        self
    }

    /// With HIL broker
    #[must_use]
    pub fn with_hil(self, broker: Arc<dyn HilBroker>) -> Self {
        self.attach_hil(broker);
        self
    }

    /// Attach bus if none is set yet; returns whether it was attached
    pub fn attach_bus(&self, bus: EventBus) -> bool {
        self.bus.set(bus).is_ok()
    }

    /// Attach HIL broker if none is set yet
    pub fn attach_hil(&self, broker: Arc<dyn HilBroker>) -> bool {
        self.hil.set(broker).is_ok()
    }

    #[inline]
    #[must_use]
    pub fn bus(&self) -> Option<&EventBus> {
        self.bus.get()
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn state(&self) -> AgentState {
        self.inner.lock().state
    }

    /// Whether scheduled ticks should run
    #[must_use]
    pub fn is_active(&self) -> bool {
        let inner = self.inner.lock();
        inner.activated && matches!(inner.state, AgentState::Running | AgentState::Error)
    }

    #[must_use]
    pub fn metrics(&self) -> AgentMetrics {
        self.inner.lock().recorder.metrics().clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Executions in the rolling window
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.inner.lock().recorder.window_len()
    }

    /// Read-only status snapshot
    #[must_use]
    pub fn snapshot(&self) -> AgentStatusSnapshot {
        let inner = self.inner.lock();
        let metrics = inner.recorder.metrics().clone();
        AgentStatusSnapshot {
            name: self.descriptor.name.clone(),
            state: inner.state,
            health: HealthStatus::from_state(inner.state),
            last_execution: metrics.last_execution,
            metrics,
            last_error: inner.last_error.clone(),
        }
    }

    /// Move to `running`; returns false when already running
    pub async fn start(&self) -> Result<bool, AgentError> {
        let from = {
            let mut inner = self.inner.lock();
            if inner.state == AgentState::Running {
                inner.activated = true;
                return Ok(false);
            }
            let from = inner.state;
            validate_transition(from, AgentState::Running)?;
            inner.state = AgentState::Running;
            inner.activated = true;
            from
        };

        tracing::info!(agent = %self.name(), from = %from, "agent started");
        self.emit(EventKind::AgentStarted, None).await;
        Ok(true)
    }

    /// Cancel the timer and move to `stopped`; an in-flight tick is not interrupted
    pub async fn stop(&self) -> Result<(), AgentError> {
        self.cancel_timer();
        let from = {
            let mut inner = self.inner.lock();
            inner.activated = false;
            if inner.state == AgentState::Stopped {
                return Ok(());
            }
            let from = inner.state;
            validate_transition(from, AgentState::Stopped)?;
            inner.state = AgentState::Stopped;
            from
        };

        tracing::info!(agent = %self.name(), from = %from, "agent stopped");
        self.emit(EventKind::AgentStopped, None).await;
        Ok(())
    }

    /// Move `running` to `paused`
    pub fn pause(&self) -> Result<(), AgentError> {
        let mut inner = self.inner.lock();
        if inner.state == AgentState::Paused {
            return Ok(());
        }
        validate_transition(inner.state, AgentState::Paused)?;
        inner.state = AgentState::Paused;
        tracing::info!(agent = %self.descriptor.name, "agent paused");
        Ok(())
    }

    /// Move `paused` back to `running`; any other state is left alone
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.state == AgentState::Paused {
            inner.state = AgentState::Running;
            tracing::info!(agent = %self.descriptor.name, "agent resumed");
        }
    }

    /// Replace the periodic timer; the previous one is cancelled
    pub fn attach_timer(&self, handle: PeriodicHandle) {
        if let Some(old) = self.timer.lock().replace(handle) {
            old.cancel();
        }
    }

    /// Cancel the periodic timer; returns whether one was attached
    pub fn cancel_timer(&self) -> bool {
        match self.timer.lock().take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Period of the live timer, if any
    #[must_use]
    pub fn timer_period(&self) -> Option<Duration> {
        self.timer
            .lock()
            .as_ref()
            .filter(|h| !h.is_cancelled())
            .map(PeriodicHandle::period)
    }

    #[must_use]
    pub fn has_timer(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|h| !h.is_cancelled())
    }

    /// Run one execution cycle around `work`
    ///
    /// Emits `execution.start`, converts an error or panic into a failed
    /// result, then records metrics and state through [`Self::finish_cycle`].
    pub async fn run_cycle<F>(&self, work: F) -> AgentResult
    where
        F: Future<Output = Result<AgentResult, AgentError>> + Send,
    {
        let started = self.begin_cycle().await;
        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => AgentResult::failed(e.to_string()),
            Err(_) => {
                tracing::error!(agent = %self.name(), "execution panicked");
                AgentResult::failed("execution panicked")
            }
        };
        self.finish_cycle(started, result).await
    }

    /// Mark the start of a cycle
    pub async fn begin_cycle(&self) -> Instant {
        self.emit(EventKind::ExecutionStart, None).await;
        Instant::now()
    }

    /// Record a finished cycle and stamp timing and metrics onto the result
    ///
    /// Failure moves the agent to `error`. Success out of `error` returns to
    /// `running` when started, `idle` otherwise.
    pub async fn finish_cycle(&self, started: Instant, mut result: AgentResult) -> AgentResult {
        let elapsed = started.elapsed();
        let (current, moved_to) = {
            let mut inner = self.inner.lock();
            inner.recorder.record(elapsed, result.success);

            let mut moved_to = None;
            if result.success {
                if inner.state == AgentState::Error {
                    let target = if inner.activated {
                        AgentState::Running
                    } else {
                        AgentState::Idle
                    };
                    inner.state = target;
                    moved_to = Some(target);
                }
            } else {
                inner.last_error.clone_from(&result.error);
                if validate_transition(inner.state, AgentState::Error).is_ok() {
                    inner.state = AgentState::Error;
                    moved_to = Some(AgentState::Error);
                }
            }
            (inner.recorder.metrics().clone(), moved_to)
        };

        result.execution_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        result.metrics = current;

        let outcome = if result.success { "success" } else { "failure" };
        metrics::counter!(
            "warden_agent_executions_total",
            "agent" => self.descriptor.name.clone(),
            "outcome" => outcome
        )
        .increment(1);

        if result.success {
            if let Some(to) = moved_to {
                tracing::info!(agent = %self.name(), to = %to, "agent recovered");
            }
            self.emit(
                EventKind::ExecutionComplete,
                Some(json!({ "execution_time_ms": result.execution_time_ms, "requires_hil": result.requires_hil })),
            )
            .await;
        } else {
            let error = result.error.clone().unwrap_or_default();
            tracing::warn!(agent = %self.name(), error = %error, state = ?moved_to, "execution failed");
            self.emit_error(EventKind::ExecutionFailed, &error).await;
            self.emit_error(EventKind::AgentError, &error).await;
        }
        result
    }

    /// Count a non-fatal internal error
    pub fn record_error(&self) {
        self.inner.lock().recorder.record_error();
    }

    pub fn record_warning(&self) {
        self.inner.lock().recorder.record_warning();
    }

    pub fn record_auto_decisions(&self, n: u64) {
        if n > 0 {
            self.inner.lock().recorder.record_auto_decisions(n);
        }
    }

    /// Escalate through the attached broker
    ///
    /// Counts the request, and counts an auto decision when no human settled it.
    pub async fn request_hil(&self, context: HilContext) -> Result<HilResponse, AgentError> {
        let broker = self
            .hil
            .get()
            .cloned()
            .ok_or_else(|| AgentError::HilUnavailable {
                agent: self.descriptor.name.clone(),
            })?;

        self.inner.lock().recorder.record_hil_request();
        self.emit(
            EventKind::HilRequested,
            Some(json!({
                "decision": context.decision,
                "confidence": context.confidence,
                "priority": context.priority,
            })),
        )
        .await;

        let response = broker.request(context).await;
        if response.is_automatic() {
            self.record_auto_decisions(1);
        }

        self.emit(
            EventKind::HilCompleted,
            Some(json!({
                "decision": response.decision,
                "decided_by": response.decided_by,
                "option_id": response.option_id,
                "request_id": response.request_id,
            })),
        )
        .await;
        Ok(response)
    }

    /// Emit an event for this agent; no-op without a bus
    pub async fn emit(&self, kind: EventKind, data: Option<Value>) {
        if let Some(bus) = self.bus.get() {
            let mut event = AgentEvent::new(kind, self.descriptor.name.clone());
            if let Some(data) = data {
                event = event.with_data(data);
            }
            bus.emit(event).await;
        }
    }

    async fn emit_error(&self, kind: EventKind, error: &str) {
        if let Some(bus) = self.bus.get() {
            bus.emit(AgentEvent::new(kind, self.descriptor.name.clone()).with_error(error))
                .await;
        }
    }

    /// Announce a strategy parameter change
    pub async fn strategy_adapted(&self, data: Value) {
        tracing::info!(agent = %self.name(), changes = %data, "strategy adapted");
        self.emit(EventKind::StrategyAdapted, Some(data)).await;
    }

    /// Announce a domain alert
    pub async fn raise_alert(&self, data: Value) {
        self.emit(EventKind::AlertRaised, Some(data)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentCategory, AutonomyLevel};

    fn runtime() -> AgentRuntime {
        AgentRuntime::new(AgentDescriptor::new(
            "probe",
            AgentCategory::Monitoring,
            AutonomyLevel::Full,
        ))
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let bus = EventBus::new();
        let rt = runtime().with_bus(bus.clone());

        assert!(rt.start().await.unwrap());
        assert!(!rt.start().await.unwrap());
        assert_eq!(rt.state(), AgentState::Running);
        assert_eq!(bus.history(None, None).len(), 1);
    }

    #[tokio::test]
    async fn failure_then_success_recovers() {
        let rt = runtime();
        rt.start().await.unwrap();

        let failed = rt.run_cycle(async { Err(AgentError::Execution("boom".into())) }).await;
        assert!(!failed.success);
        assert_eq!(rt.state(), AgentState::Error);
        assert_eq!(rt.last_error().as_deref(), Some("execution failed: boom"));
        assert!(rt.is_active());

        let ok = rt.run_cycle(async { Ok(AgentResult::ok(Value::Null)) }).await;
        assert!(ok.success);
        assert_eq!(rt.state(), AgentState::Running);
        assert_eq!(ok.metrics.total_executions, 2);
        assert_eq!(ok.metrics.errors, 1);
    }

    #[tokio::test]
    async fn unstarted_agent_recovers_to_idle() {
        let rt = runtime();
        rt.run_cycle(async { Err(AgentError::Execution("x".into())) }).await;
        assert_eq!(rt.state(), AgentState::Error);
        rt.run_cycle(async { Ok(AgentResult::ok(Value::Null)) }).await;
        assert_eq!(rt.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn panic_in_work_becomes_failed_result() {
        let rt = runtime();
        let result = rt
            .run_cycle(async {
                if rt.name() == "probe" {
                    panic!("boom");
                }
                Ok(AgentResult::ok(Value::Null))
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("execution panicked"));
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let rt = runtime();
        assert!(rt.pause().is_err());

        rt.start().await.unwrap();
        rt.pause().unwrap();
        assert_eq!(rt.state(), AgentState::Paused);
        assert!(!rt.is_active());

        rt.resume();
        assert_eq!(rt.state(), AgentState::Running);

        rt.stop().await.unwrap();
        rt.resume();
        assert_eq!(rt.state(), AgentState::Stopped);
    }

    #[tokio::test]
    async fn request_hil_without_broker_fails() {
        let rt = runtime();
        let ctx = HilContext::new("probe", "x", 0.5, crate::hil::Priority::Low);
        assert!(matches!(
            rt.request_hil(ctx).await,
            Err(AgentError::HilUnavailable { .. })
        ));
    }
}
