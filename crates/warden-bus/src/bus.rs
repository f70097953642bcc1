//! Event bus
//!
//! Typed fan-out with a capacity-bounded history:
//! - Listeners subscribe to one [`EventKind`] or to every kind ([`Topic::All`])
//! - `emit` records the event, then runs every matching listener concurrently
//!   and waits for all of them
//! - A listener that returns an error or panics is logged and isolated

use crate::event::{AgentEvent, EventKind};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Default number of events retained in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// What a listener is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// One specific event kind
    Kind(EventKind),
    /// Wildcard: every event
    All,
}

impl Topic {
    #[inline]
    fn matches(self, kind: EventKind) -> bool {
        match self {
            Topic::All => true,
            Topic::Kind(k) => k == kind,
        }
    }
}

impl From<EventKind> for Topic {
    fn from(kind: EventKind) -> Self {
        Topic::Kind(kind)
    }
}

/// Receiver of bus events
#[async_trait::async_trait]
pub trait EventListener: Send + Sync {
    /// Handle one event
    async fn on_event(&self, event: &AgentEvent) -> anyhow::Result<()>;
}

struct FnListener<F>(F);

#[async_trait::async_trait]
impl<F, Fut> EventListener for FnListener<F>
where
    F: Fn(AgentEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: &AgentEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

/// Outcome of one `emit` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Listeners invoked
    pub invoked: usize,
    /// Listeners that returned an error or panicked
    pub failed: usize,
}

struct RegisteredListener {
    id: u64,
    topic: Topic,
    listener: Arc<dyn EventListener>,
}

struct BusInner {
    listeners: RwLock<Vec<RegisteredListener>>,
    history: Mutex<VecDeque<AgentEvent>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }
}

/// Publish/subscribe bus, cheap to clone
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.inner.listeners.read().len())
            .field("history", &self.inner.history.lock().len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl EventBus {
    /// Create bus with the default history capacity
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create bus retaining at most `capacity` events (minimum 1)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe a listener to a topic
    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        listener: Arc<dyn EventListener>,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = topic.into();
        self.inner.listeners.write().push(RegisteredListener {
            id,
            topic,
            listener,
        });
        tracing::debug!(listener_id = id, ?topic, "listener subscribed");

        Subscription {
            id,
            topic,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe an async closure to a topic
    pub fn subscribe_fn<F, Fut>(&self, topic: impl Into<Topic>, f: F) -> Subscription
    where
        F: Fn(AgentEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(topic, Arc::new(FnListener(f)))
    }

    /// Record an event and deliver it to every matching listener
    ///
    /// Returns once all listeners have finished. Never fails: listener errors
    /// and panics are logged and counted in the report.
    pub async fn emit(&self, event: AgentEvent) -> EmitReport {
        {
            let mut history = self.inner.history.lock();
            history.push_back(event.clone());
            while history.len() > self.inner.capacity {
                history.pop_front();
            }
        }
        metrics::counter!("warden_bus_events_total", "kind" => event.kind.as_str()).increment(1);

        let targets: Vec<(u64, Arc<dyn EventListener>)> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|l| l.topic.matches(event.kind))
            .map(|l| (l.id, Arc::clone(&l.listener)))
            .collect();

        let event_ref = &event;
        let outcomes = join_all(targets.iter().map(|(id, listener)| async move {
            let outcome = AssertUnwindSafe(listener.on_event(event_ref))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(
                        listener_id = id,
                        kind = %event_ref.kind,
                        agent = %event_ref.agent,
                        error = %e,
                        "event listener failed"
                    );
                    false
                }
                Err(_) => {
                    tracing::error!(
                        listener_id = id,
                        kind = %event_ref.kind,
                        agent = %event_ref.agent,
                        "event listener panicked"
                    );
                    false
                }
            }
        }))
        .await;

        EmitReport {
            invoked: outcomes.len(),
            failed: outcomes.iter().filter(|ok| !**ok).count(),
        }
    }

    /// Query history, oldest first
    ///
    /// `agent` filters by agent name; `limit` keeps only the trailing N matches.
    #[must_use]
    pub fn history(&self, agent: Option<&str>, limit: Option<usize>) -> Vec<AgentEvent> {
        let history = self.inner.history.lock();
        let mut matched: Vec<AgentEvent> = history
            .iter()
            .filter(|e| agent.map_or(true, |a| e.agent == a))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let excess = matched.len().saturating_sub(limit);
            matched.drain(..excess);
        }
        matched
    }

    /// Drop all recorded events
    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    /// Number of events currently retained
    #[inline]
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }

    /// History capacity
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of listeners registered on exactly this topic
    #[must_use]
    pub fn listener_count(&self, topic: impl Into<Topic>) -> usize {
        let topic = topic.into();
        self.inner
            .listeners
            .read()
            .iter()
            .filter(|l| l.topic == topic)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to detach
///
/// Dropping the handle leaves the listener attached.
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener attached; keep it to unsubscribe"]
pub struct Subscription {
    id: u64,
    topic: Topic,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Listener ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribed topic
    #[inline]
    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Detach the listener. Returns false if the bus is gone or it was already removed.
    pub fn unsubscribe(self) -> bool {
        self.bus.upgrade().map_or(false, |bus| bus.remove(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_listener(bus: &EventBus, topic: Topic, hits: &Arc<AtomicUsize>) -> Subscription {
        let hits = Arc::clone(hits);
        bus.subscribe_fn(topic, move |_event| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
    }

    #[tokio::test]
    async fn emit_reaches_kind_and_wildcard_listeners() {
        let bus = EventBus::new();
        let kind_hits = Arc::new(AtomicUsize::new(0));
        let all_hits = Arc::new(AtomicUsize::new(0));

        let _a = counter_listener(&bus, EventKind::AgentStarted.into(), &kind_hits);
        let _b = counter_listener(&bus, Topic::All, &all_hits);

        bus.emit(AgentEvent::new(EventKind::AgentStarted, "a")).await;
        bus.emit(AgentEvent::new(EventKind::AgentStopped, "a")).await;

        assert_eq!(kind_hits.load(Ordering::SeqCst), 1);
        assert_eq!(all_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_detaches_listener() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = counter_listener(&bus, Topic::All, &hits);

        assert!(sub.unsubscribe());
        let report = bus.emit(AgentEvent::new(EventKind::AgentError, "a")).await;

        assert_eq!(report.invoked, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(Topic::All), 0);
    }

    #[tokio::test]
    async fn history_filters_by_agent_and_limit() {
        let bus = EventBus::new();
        for i in 0..5 {
            let agent = if i % 2 == 0 { "even" } else { "odd" };
            bus.emit(AgentEvent::new(EventKind::ExecutionStart, agent).with_data(i.into()))
                .await;
        }

        let even = bus.history(Some("even"), None);
        assert_eq!(even.len(), 3);

        let last_two = bus.history(None, Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].data, Some(3.into()));
        assert_eq!(last_two[1].data, Some(4.into()));

        bus.clear_history();
        assert_eq!(bus.history_len(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::with_capacity(0);
        assert_eq!(bus.capacity(), 1);
    }
}
