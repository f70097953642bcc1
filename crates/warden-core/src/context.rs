//! Execution context passed into a single `execute` call

use crate::domain::{RuleAction, SecurityEvent, Ticket};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// What caused the execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Periodic tick
    Scheduled,
    /// Host or operator request
    Manual,
    /// Another agent or event
    Event(String),
}

/// Operation an error-recovery agent wraps; called once per attempt
pub type OperationFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Caller-supplied fallible operation
#[derive(Clone)]
pub struct RecoverableOperation {
    /// Label used in logs and learning data
    pub id: String,
    op: OperationFn,
}

impl RecoverableOperation {
    /// Wrap an async closure; its error is rendered with `Display`
    pub fn new<F, Fut, E>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let op: OperationFn = Arc::new(move || -> BoxFuture<'static, Result<Value, String>> {
            let fut = f();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });
        Self { id: id.into(), op }
    }

    /// Run one attempt
    pub async fn call(&self) -> Result<Value, String> {
        (self.op)().await
    }
}

impl std::fmt::Debug for RecoverableOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverableOperation").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Typed work item
#[derive(Debug, Clone, Default)]
pub enum ContextPayload {
    /// Nothing beyond the trigger
    #[default]
    None,
    Operation(RecoverableOperation),
    Ticket(Ticket),
    SecurityEvent(SecurityEvent),
    /// A rule outcome being checked for escalation
    SecurityAction { event: SecurityEvent, action: RuleAction },
}

/// Transient per-call context
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trigger: Trigger,
    pub requested_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, Value>,
    pub payload: ContextPayload,
}

impl ExecutionContext {
    /// Context for a periodic tick
    #[must_use]
    pub fn scheduled() -> Self {
        Self::new(Trigger::Scheduled)
    }

    /// Context for an operator request
    #[must_use]
    pub fn manual() -> Self {
        Self::new(Trigger::Manual)
    }

    /// Create context with the given trigger and no payload
    #[must_use]
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            requested_at: Utc::now(),
            metadata: BTreeMap::new(),
            payload: ContextPayload::None,
        }
    }

    /// With payload
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, payload: ContextPayload) -> Self {
        self.payload = payload;
        self
    }

    /// With metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Manual context wrapping an operation
    #[must_use]
    pub fn operation(op: RecoverableOperation) -> Self {
        Self::manual().with_payload(ContextPayload::Operation(op))
    }

    /// Manual context carrying a ticket
    #[must_use]
    pub fn ticket(ticket: Ticket) -> Self {
        Self::manual().with_payload(ContextPayload::Ticket(ticket))
    }

    /// Manual context carrying a security event
    #[must_use]
    pub fn security_event(event: SecurityEvent) -> Self {
        Self::manual().with_payload(ContextPayload::SecurityEvent(event))
    }
}
