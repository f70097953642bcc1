//! Testing utilities for Warden workspace
//!
//! Shared fakes for the injected collaborators plus small fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use warden_bus::{AgentEvent, EventBus, EventKind};
use warden_core::{
    AgentError, DecidedBy, HealthProbe, HilBroker, HilContext, HilDecision, HilError, HilHandler,
    HilResponse, MetricSample, MetricsSource, Notification, NotificationError, NotificationSender,
    ProbeReading, Ticket, TicketSink,
};

/// Notifier that records everything it is sent
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Notifier whose deliveries fail (and are still recorded)
    pub fn failing() -> Arc<Self> {
        let n = Self::default();
        n.fail.store(true, Ordering::SeqCst);
        Arc::new(n)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_notification(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.lock().push(notification);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("recording notifier set to fail".into()));
        }
        Ok(())
    }
}

/// Ticket sink that keeps submitted tickets
#[derive(Debug, Default)]
pub struct RecordingTicketSink {
    tickets: Mutex<Vec<Ticket>>,
}

impl RecordingTicketSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.tickets.lock().clone()
    }
}

impl TicketSink for RecordingTicketSink {
    fn submit_ticket(&self, ticket: Ticket) {
        self.tickets.lock().push(ticket);
    }
}

/// Handler that answers every request with the same decision
#[derive(Debug)]
pub struct ScriptedHandler {
    decision: HilDecision,
    option_id: Option<String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<HilContext>>,
}

impl ScriptedHandler {
    pub fn new(decision: HilDecision, option_id: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            decision,
            option_id: option_id.map(String::from),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<HilContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl HilHandler for ScriptedHandler {
    async fn handle(&self, request_id: Uuid, context: &HilContext) -> Result<HilResponse, HilError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(context.clone());
        let mut response = HilResponse::new(self.decision, "scripted", DecidedBy::Handler)
            .with_request_id(request_id);
        response.option_id.clone_from(&self.option_id);
        Ok(response)
    }
}

/// Handler that always fails
#[derive(Debug, Default)]
pub struct FailingHandler;

#[async_trait]
impl HilHandler for FailingHandler {
    async fn handle(&self, _request_id: Uuid, _context: &HilContext) -> Result<HilResponse, HilError> {
        Err(HilError::HandlerFailed("reviewer backend offline".into()))
    }
}

/// Handler that never answers
#[derive(Debug, Default)]
pub struct StallingHandler;

#[async_trait]
impl HilHandler for StallingHandler {
    async fn handle(&self, _request_id: Uuid, _context: &HilContext) -> Result<HilResponse, HilError> {
        std::future::pending::<()>().await;
        Err(HilError::HandlerFailed("unreachable".into()))
    }
}

/// Broker that replays queued responses, then falls back to a default decision
#[derive(Debug)]
pub struct ScriptedBroker {
    queue: Mutex<VecDeque<HilResponse>>,
    fallback: HilDecision,
    requests: Mutex<Vec<HilContext>>,
}

impl ScriptedBroker {
    pub fn new(fallback: HilDecision) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a response choosing `option_id`
    pub fn push(&self, decision: HilDecision, option_id: &str) {
        self.queue
            .lock()
            .push_back(HilResponse::new(decision, "scripted", DecidedBy::Reviewer).with_option(option_id));
    }

    pub fn requests(&self) -> Vec<HilContext> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HilBroker for ScriptedBroker {
    async fn request(&self, context: HilContext) -> HilResponse {
        self.requests.lock().push(context);
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| HilResponse::new(self.fallback, "fallback", DecidedBy::Reviewer))
    }
}

/// Metrics source replaying scripted samples; the last one repeats
#[derive(Debug)]
pub struct ScriptedMetrics {
    samples: Mutex<VecDeque<Result<MetricSample, String>>>,
    last: Mutex<Option<Result<MetricSample, String>>>,
}

impl ScriptedMetrics {
    pub fn new(samples: Vec<Result<MetricSample, String>>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples.into()),
            last: Mutex::new(None),
        })
    }

    /// Source always returning `pairs`
    pub fn constant(pairs: &[(&str, f64)]) -> Arc<Self> {
        Self::new(vec![Ok(sample(pairs))])
    }

    /// Source that always fails
    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(vec![Err(message.to_string())])
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetrics {
    async fn collect(&self) -> Result<MetricSample, AgentError> {
        let next = self.samples.lock().pop_front();
        let value = match next {
            Some(v) => {
                *self.last.lock() = Some(v.clone());
                v
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Ok(MetricSample::new())),
        };
        value.map_err(AgentError::Collaborator)
    }
}

/// Build a metric sample from pairs
pub fn sample(pairs: &[(&str, f64)]) -> MetricSample {
    pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
}

/// Probe with a fixed outcome
#[derive(Debug, Clone)]
pub enum FixedProbe {
    Up(Duration),
    Down(String),
}

#[async_trait]
impl HealthProbe for FixedProbe {
    async fn probe(&self) -> Result<ProbeReading, AgentError> {
        match self {
            FixedProbe::Up(latency) => Ok(ProbeReading::new(*latency)),
            FixedProbe::Down(msg) => Err(AgentError::Collaborator(msg.clone())),
        }
    }
}

/// Probe that panics
#[derive(Debug, Default)]
pub struct PanickingProbe;

#[async_trait]
impl HealthProbe for PanickingProbe {
    async fn probe(&self) -> Result<ProbeReading, AgentError> {
        panic!("probe exploded");
    }
}

/// Count events of `kind` in bus history
pub fn count_events(bus: &EventBus, kind: EventKind) -> usize {
    bus.history(None, None).iter().filter(|e| e.kind == kind).count()
}

/// Events of `kind` in bus history
pub fn events_of(bus: &EventBus, kind: EventKind) -> Vec<AgentEvent> {
    bus.history(None, None).into_iter().filter(|e| e.kind == kind).collect()
}
