//! The agent contract
//!
//! Every agent embeds an [`AgentRuntime`] and implements [`Agent::execute`]
//! plus its capability and escalation predicates. Lifecycle verbs, status and
//! metrics default to the runtime.

use crate::context::ExecutionContext;
use crate::error::AgentError;
use crate::hil::{HilContext, HilResponse};
use crate::runtime::AgentRuntime;
use crate::types::{AgentDescriptor, AgentMetrics, AgentResult, AgentStatusSnapshot};
use std::time::Duration;

/// Autonomous unit with a lifecycle and a decision loop
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Embedded runtime
    fn runtime(&self) -> &AgentRuntime;

    fn descriptor(&self) -> &AgentDescriptor {
        self.runtime().descriptor()
    }

    fn name(&self) -> &str {
        self.runtime().name()
    }

    /// Period of the scheduled loop; `None` for on-demand agents
    fn tick_period(&self) -> Option<Duration> {
        None
    }

    /// One-time setup before registration completes
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), AgentError> {
        self.runtime().start().await.map(|_| ())
    }

    async fn stop(&self) -> Result<(), AgentError> {
        self.runtime().stop().await
    }

    async fn pause(&self) -> Result<(), AgentError> {
        self.runtime().pause()
    }

    async fn resume(&self) -> Result<(), AgentError> {
        self.runtime().resume();
        Ok(())
    }

    /// Release resources before unregistration
    async fn cleanup(&self) -> Result<(), AgentError> {
        self.stop().await
    }

    /// Run one cycle. Failures are reported in the result, never returned.
    async fn execute(&self, context: ExecutionContext) -> AgentResult;

    fn status(&self) -> AgentStatusSnapshot {
        self.runtime().snapshot()
    }

    fn metrics(&self) -> AgentMetrics {
        self.runtime().metrics()
    }

    /// Whether this agent can do anything with `context`
    fn can_handle(&self, context: &ExecutionContext) -> bool;

    /// Whether acting on `context` needs a human decision
    fn requires_hil(&self, context: &ExecutionContext) -> bool;

    /// Escalate a decision arising from `context`
    async fn request_hil(
        &self,
        _context: &ExecutionContext,
        hil: HilContext,
    ) -> Result<HilResponse, AgentError> {
        self.runtime().request_hil(hil).await
    }

    /// Feed an outcome back into learning state
    fn learn_from_result(&self, _result: &AgentResult) {}

    /// Adjust parameters from accumulated learning state
    async fn adapt_strategy(&self) {}
}
