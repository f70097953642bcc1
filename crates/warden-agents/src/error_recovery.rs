//! Error-recovery agent
//!
//! Wraps a caller-supplied [`RecoverableOperation`] in exponential-backoff
//! retry:
//! - At most `max_retries` attempts, including the first
//! - Failures are classified by message; non-retryable ones stop immediately
//! - Delay before attempt `n + 1` is `base * 2^(n-1)`, capped at `max_backoff`
//! - Exhausting every attempt flags the result as needing a human, but the
//!   agent never escalates on its own
//!
//! Per error type it learns whether retrying helps and stretches the base
//! delay for types that keep failing.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use warden_core::{
    Agent, AgentCategory, AgentDescriptor, AgentError, AgentResult, AgentRuntime, AutonomyLevel,
    ContextPayload, ExecutionContext, RecoverableOperation, RetryConfig,
};

/// Registered name
pub const ERROR_RECOVERY_AGENT: &str = "error-recovery";

/// Upper bound on `max_retries` reachable through adaptation
pub const MAX_ADAPTED_RETRIES: u32 = 5;

const ERROR_HISTORY_LIMIT: usize = 100;

/// Substrings marking a failure as transient
const RETRYABLE_VOCABULARY: [&str; 7] = [
    "econnrefused",
    "etimedout",
    "enotfound",
    "econnreset",
    "timeout",
    "network",
    "temporary",
];

/// Coarse failure class used as the learning key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    Network,
    Authorization,
    NotFound,
    ServerError,
    Unknown,
}

impl ErrorType {
    /// Classify an error message, case-insensitively
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let m = message.to_lowercase();
        if m.contains("timeout") || m.contains("timed out") {
            ErrorType::Timeout
        } else if m.contains("network") || m.contains("connection") {
            ErrorType::Network
        } else if m.contains("permission") || m.contains("unauthorized") {
            ErrorType::Authorization
        } else if m.contains("not found") || m.contains("404") {
            ErrorType::NotFound
        } else if m.contains("server error") || m.contains("500") {
            ErrorType::ServerError
        } else {
            ErrorType::Unknown
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::Network => "network",
            ErrorType::Authorization => "authorization",
            ErrorType::NotFound => "not_found",
            ErrorType::ServerError => "server_error",
            ErrorType::Unknown => "unknown",
        }
    }
}

/// Whether `message` matches the transient-failure vocabulary
#[must_use]
pub fn matches_retryable_vocabulary(message: &str) -> bool {
    let m = message.to_lowercase();
    RETRYABLE_VOCABULARY.iter().any(|needle| m.contains(needle))
}

/// Delay to wait after failed attempt `attempt` (1-based)
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32, config: &RetryConfig) -> Duration {
    if !config.exponential_backoff {
        return base;
    }
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(config.max_backoff())
}

/// Learned behaviour of one error type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorTypeStats {
    pub retryable: bool,
    /// Running success rate of cycles that hit this type
    pub success_rate: f64,
    pub optimal_delay: Duration,
    /// Cycles that hit this type
    pub attempts: u32,
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub operation: String,
    pub message: String,
    pub error_type: ErrorType,
    pub retryable: bool,
    pub attempt: u32,
    /// Set when a later attempt of the same call succeeded
    pub recovered: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Payload of a recovery cycle's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub operation: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Type of the last error seen during the call, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    pub recovered: bool,
}

#[derive(Debug, Default)]
struct RecoveryState {
    history: VecDeque<ErrorRecord>,
    learning: BTreeMap<ErrorType, ErrorTypeStats>,
}

/// Retries failing operations with exponential backoff
pub struct ErrorRecoveryAgent {
    runtime: AgentRuntime,
    config: RwLock<RetryConfig>,
    state: Mutex<RecoveryState>,
}

impl std::fmt::Debug for ErrorRecoveryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoveryAgent")
            .field("runtime", &self.runtime)
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

impl ErrorRecoveryAgent {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let descriptor = AgentDescriptor::new(
            ERROR_RECOVERY_AGENT,
            AgentCategory::Remediation,
            AutonomyLevel::Full,
        )
        .with_description("Retries failing operations with exponential backoff");
        Self {
            runtime: AgentRuntime::new(descriptor),
            config: RwLock::new(config),
            state: Mutex::new(RecoveryState::default()),
        }
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        self.config.read().clone()
    }

    /// Replace the retry policy; applies from the next call
    pub fn update_retry_config(&self, config: RetryConfig) {
        tracing::info!(
            agent = %self.runtime.name(),
            max_retries = config.max_retries,
            retry_delay_ms = config.retry_delay_ms,
            "retry config updated"
        );
        *self.config.write() = config;
    }

    /// Recent failed attempts, oldest first
    #[must_use]
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    #[must_use]
    pub fn error_stats(&self) -> BTreeMap<ErrorType, ErrorTypeStats> {
        self.state.lock().learning.clone()
    }

    /// Retryability: learned once a type has been seen three times, vocabulary before that
    #[must_use]
    pub fn is_retryable(&self, message: &str) -> bool {
        let error_type = ErrorType::classify(message);
        if let Some(stats) = self.state.lock().learning.get(&error_type) {
            if stats.attempts >= 3 {
                return stats.retryable;
            }
        }
        matches_retryable_vocabulary(message)
    }

    fn base_delay(&self, error_type: ErrorType, config: &RetryConfig) -> Duration {
        self.state
            .lock()
            .learning
            .get(&error_type)
            .map_or_else(|| config.retry_delay(), |s| s.optimal_delay)
    }

    fn push_error(&self, record: ErrorRecord) {
        let mut state = self.state.lock();
        state.history.push_back(record);
        while state.history.len() > ERROR_HISTORY_LIMIT {
            state.history.pop_front();
        }
    }

    fn mark_recovered(&self) {
        if let Some(last) = self.state.lock().history.back_mut() {
            last.recovered = true;
        }
    }

    async fn recover(&self, op: &RecoverableOperation) -> Result<AgentResult, AgentError> {
        let config = self.config.read().clone();
        let mut attempt = 0u32;
        let mut last_error: Option<(String, ErrorType)> = None;

        while attempt < config.max_retries {
            attempt += 1;
            match op.call().await {
                Ok(output) => {
                    if attempt > 1 {
                        self.runtime.record_warning();
                        self.mark_recovered();
                        tracing::info!(operation = %op.id, attempt, "operation recovered after retry");
                    }
                    let outcome = RecoveryOutcome {
                        operation: op.id.clone(),
                        attempts: attempt,
                        output: Some(output),
                        error_type: last_error.map(|(_, t)| t),
                        recovered: attempt > 1,
                    };
                    return Ok(AgentResult::ok(json!(outcome)));
                }
                Err(message) => {
                    let error_type = ErrorType::classify(&message);
                    let retryable = self.is_retryable(&message);
                    self.push_error(ErrorRecord {
                        operation: op.id.clone(),
                        message: message.clone(),
                        error_type,
                        retryable,
                        attempt,
                        recovered: false,
                        timestamp: chrono::Utc::now(),
                    });
                    tracing::debug!(operation = %op.id, attempt, error = %message, retryable, "attempt failed");
                    last_error = Some((message, error_type));

                    if attempt >= config.max_retries || !retryable {
                        break;
                    }
                    let delay = backoff_delay(self.base_delay(error_type, &config), attempt, &config);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let (message, error_type) =
            last_error.unwrap_or_else(|| ("operation failed after retries".to_string(), ErrorType::Unknown));
        let exhausted = attempt >= config.max_retries;
        tracing::warn!(operation = %op.id, attempts = attempt, exhausted, error = %message, "operation not recovered");

        let outcome = RecoveryOutcome {
            operation: op.id.clone(),
            attempts: attempt,
            output: None,
            error_type: Some(error_type),
            recovered: false,
        };
        Ok(AgentResult::failed(message)
            .with_data(json!(outcome))
            .with_requires_hil(exhausted))
    }
}

#[async_trait::async_trait]
impl Agent for ErrorRecoveryAgent {
    fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    async fn execute(&self, context: ExecutionContext) -> AgentResult {
        let result = self
            .runtime
            .run_cycle(async {
                match &context.payload {
                    ContextPayload::Operation(op) => self.recover(op).await,
                    _ => Err(AgentError::InvalidContext(
                        "error recovery needs an operation to run".into(),
                    )),
                }
            })
            .await;
        self.learn_from_result(&result);
        result
    }

    fn can_handle(&self, context: &ExecutionContext) -> bool {
        matches!(context.payload, ContextPayload::Operation(_))
    }

    fn requires_hil(&self, _context: &ExecutionContext) -> bool {
        false
    }

    fn learn_from_result(&self, result: &AgentResult) {
        let Ok(outcome) = serde_json::from_value::<RecoveryOutcome>(result.data.clone()) else {
            return;
        };
        let Some(error_type) = outcome.error_type else {
            return;
        };
        let default_delay = self.config.read().retry_delay();
        let vocabulary_retryable = self
            .state
            .lock()
            .history
            .back()
            .map_or(false, |r| matches_retryable_vocabulary(&r.message));

        let mut state = self.state.lock();
        let stats = state.learning.entry(error_type).or_insert_with(|| ErrorTypeStats {
            retryable: vocabulary_retryable,
            success_rate: 0.0,
            optimal_delay: default_delay,
            attempts: 0,
        });
        stats.attempts += 1;
        let n = f64::from(stats.attempts);
        let hit = if result.success { 1.0 } else { 0.0 };
        stats.success_rate = (stats.success_rate * (n - 1.0) + hit) / n;
        if result.success {
            stats.retryable = true;
        }
    }

    async fn adapt_strategy(&self) {
        let metrics = self.runtime.metrics();
        if self.runtime.window_len() < 10 {
            return;
        }

        let mut changes = serde_json::Map::new();
        {
            let mut config = self.config.write();
            if metrics.success_rate < 0.5 && config.max_retries < MAX_ADAPTED_RETRIES {
                config.max_retries += 1;
                changes.insert("max_retries".into(), json!(config.max_retries));
            }

            let cap = config.max_backoff();
            let mut state = self.state.lock();
            for (error_type, stats) in &mut state.learning {
                if stats.attempts >= 5 && stats.success_rate < 0.3 && stats.optimal_delay < cap {
                    stats.optimal_delay = stats.optimal_delay.mul_f64(1.5).min(cap);
                    changes.insert(
                        format!("{}_delay_ms", error_type.as_str()),
                        json!(stats.optimal_delay.as_millis() as u64),
                    );
                }
            }
        }

        if !changes.is_empty() {
            self.runtime.strategy_adapted(serde_json::Value::Object(changes)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            retry_delay_ms: 1_000,
            exponential_backoff: true,
            max_backoff_ms: 30_000,
        }
    }

    #[test]
    fn classification_covers_every_type() {
        assert_eq!(ErrorType::classify("Request timed out"), ErrorType::Timeout);
        assert_eq!(ErrorType::classify("connection reset"), ErrorType::Network);
        assert_eq!(ErrorType::classify("Unauthorized"), ErrorType::Authorization);
        assert_eq!(ErrorType::classify("HTTP 404"), ErrorType::NotFound);
        assert_eq!(ErrorType::classify("internal server error"), ErrorType::ServerError);
        assert_eq!(ErrorType::classify("ECONNREFUSED"), ErrorType::Unknown);
    }

    #[test]
    fn vocabulary_is_case_insensitive() {
        assert!(matches_retryable_vocabulary("ECONNRESET by peer"));
        assert!(matches_retryable_vocabulary("Temporary failure"));
        assert!(!matches_retryable_vocabulary("invalid input"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = config();
        let base = cfg.retry_delay();
        assert_eq!(backoff_delay(base, 1, &cfg), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(base, 2, &cfg), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(base, 10, &cfg), Duration::from_millis(30_000));

        let flat = RetryConfig { exponential_backoff: false, ..cfg };
        assert_eq!(backoff_delay(base, 4, &flat), base);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_wait_one_then_two_seconds() {
        let agent = ErrorRecoveryAgent::new(config());
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stamps);
        let op = RecoverableOperation::new("fetch", move || {
            seen.lock().push(Instant::now());
            async { Err::<Value, _>("ETIMEDOUT") }
        });

        let result = agent.execute(ExecutionContext::operation(op)).await;

        assert!(!result.success);
        assert!(result.requires_hil);
        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[1] - stamps[0], Duration::from_millis(1_000));
        assert_eq!(stamps[2] - stamps[1], Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_after_one_attempt() {
        let agent = ErrorRecoveryAgent::new(config());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = RecoverableOperation::new("write", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, _>("invalid payload") }
        });

        let result = agent.execute(ExecutionContext::operation(op)).await;

        assert!(!result.success);
        assert!(!result.requires_hil);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_on_second_attempt_counts_warning() {
        let agent = ErrorRecoveryAgent::new(config());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = RecoverableOperation::new("sync", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err("network unreachable".to_string())
                } else {
                    Ok(json!("done"))
                }
            }
        });

        let result = agent.execute(ExecutionContext::operation(op)).await;

        assert!(result.success);
        assert_eq!(result.metrics.warnings, 1);
        assert_eq!(result.data["attempts"], 2);
        assert!(agent.error_history()[0].recovered);
        assert_eq!(agent.error_stats()[&ErrorType::Network].success_rate, 1.0);
    }

    fn failing_op(message: &'static str) -> ExecutionContext {
        ExecutionContext::operation(RecoverableOperation::new("op", move || async move {
            Err::<Value, _>(message)
        }))
    }

    #[tokio::test]
    async fn learned_retryability_overrides_vocabulary_after_three_cycles() {
        let agent = ErrorRecoveryAgent::new(config());
        assert!(agent.is_retryable("network unreachable"));

        for _ in 0..2 {
            agent.execute(failing_op("connection refused")).await;
        }
        assert_eq!(agent.error_stats()[&ErrorType::Network].attempts, 2);
        assert!(agent.is_retryable("network unreachable"));

        agent.execute(failing_op("connection refused")).await;
        assert!(!agent.error_stats()[&ErrorType::Network].retryable);
        assert!(!agent.is_retryable("network unreachable"));
        assert!(agent.is_retryable("temporary glitch"));
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_type_becomes_retryable_despite_vocabulary() {
        let agent = ErrorRecoveryAgent::new(config());
        assert!(!agent.is_retryable("timed out"));

        for _ in 0..3 {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let op = RecoverableOperation::new("poll", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("request timeout".to_string())
                    } else {
                        Ok(json!("ok"))
                    }
                }
            });
            assert!(agent.execute(ExecutionContext::operation(op)).await.success);
        }

        assert!(agent.error_stats()[&ErrorType::Timeout].retryable);
        assert!(agent.is_retryable("timed out"));
    }

    #[tokio::test]
    async fn adaptation_needs_a_full_window() {
        let agent = ErrorRecoveryAgent::new(config());
        for _ in 0..9 {
            agent.execute(failing_op("invalid payload")).await;
        }
        agent.adapt_strategy().await;
        assert_eq!(agent.retry_config().max_retries, 3);
        assert_eq!(
            agent.error_stats()[&ErrorType::Unknown].optimal_delay,
            Duration::from_millis(1_000)
        );
    }

    #[tokio::test]
    async fn failing_window_adds_retries_and_stretches_stubborn_delays() {
        let agent = ErrorRecoveryAgent::new(config());
        for _ in 0..2 {
            agent.execute(failing_op("permission denied")).await;
        }
        for _ in 0..10 {
            agent.execute(failing_op("invalid payload")).await;
        }

        agent.adapt_strategy().await;
        assert_eq!(agent.retry_config().max_retries, 4);
        let stats = agent.error_stats();
        assert_eq!(stats[&ErrorType::Unknown].optimal_delay, Duration::from_millis(1_500));
        assert_eq!(
            stats[&ErrorType::Authorization].optimal_delay,
            Duration::from_millis(1_000)
        );

        agent.adapt_strategy().await;
        agent.adapt_strategy().await;
        assert_eq!(agent.retry_config().max_retries, MAX_ADAPTED_RETRIES);
        assert_eq!(
            agent.error_stats()[&ErrorType::Unknown].optimal_delay,
            Duration::from_millis(3_375)
        );
    }

    #[tokio::test]
    async fn stretched_delay_stops_at_max_backoff() {
        let agent = ErrorRecoveryAgent::new(RetryConfig {
            max_backoff_ms: 2_000,
            ..config()
        });
        for _ in 0..10 {
            agent.execute(failing_op("invalid payload")).await;
        }
        for _ in 0..4 {
            agent.adapt_strategy().await;
        }
        assert_eq!(
            agent.error_stats()[&ErrorType::Unknown].optimal_delay,
            Duration::from_millis(2_000)
        );
    }

    #[tokio::test]
    async fn missing_operation_fails_cycle() {
        let agent = ErrorRecoveryAgent::new(config());
        let result = agent.execute(ExecutionContext::manual()).await;
        assert!(!result.success);
        assert!(!agent.can_handle(&ExecutionContext::manual()));
    }
}
