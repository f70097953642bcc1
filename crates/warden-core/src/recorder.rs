//! Rolling execution metrics recorder
//!
//! Success rate and average duration are computed over the most recent
//! [`ROLLING_WINDOW`] executions; counters are lifetime totals.

use crate::types::AgentMetrics;
use chrono::Utc;
use std::collections::VecDeque;
use std::time::Duration;

/// Executions kept for rate/average computation
pub const ROLLING_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Sample {
    duration: Duration,
    success: bool,
}

/// Accumulates per-execution samples into [`AgentMetrics`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecorder {
    window: VecDeque<Sample>,
    metrics: AgentMetrics,
}

impl ExecutionRecorder {
    /// Create empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished execution
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.window.push_back(Sample { duration, success });
        while self.window.len() > ROLLING_WINDOW {
            self.window.pop_front();
        }

        self.metrics.total_executions += 1;
        if !success {
            self.metrics.errors += 1;
        }
        self.metrics.last_execution = Some(Utc::now());

        let n = self.window.len() as f64;
        let successes = self.window.iter().filter(|s| s.success).count() as f64;
        let total_ms: f64 = self
            .window
            .iter()
            .map(|s| s.duration.as_secs_f64() * 1000.0)
            .sum();
        self.metrics.success_rate = successes / n;
        self.metrics.average_execution_time_ms = total_ms / n;
    }

    /// Count an error outside the execution outcome (e.g. one monitor failing)
    pub fn record_error(&mut self) {
        self.metrics.errors += 1;
    }

    pub fn record_warning(&mut self) {
        self.metrics.warnings += 1;
    }

    pub fn record_hil_request(&mut self) {
        self.metrics.hil_requests += 1;
    }

    pub fn record_auto_decisions(&mut self, n: u64) {
        self.metrics.auto_decisions += n;
    }

    /// Executions currently in the window
    #[inline]
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Current metrics
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }
}
