//! Property tests for security scoring and recovery backoff

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use warden_agents::error_recovery::backoff_delay;
use warden_agents::SecurityAgent;
use warden_core::{LogNotifier, RetryConfig, SecurityEvent, SecurityEventKind, Severity};

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn kind() -> impl Strategy<Value = SecurityEventKind> {
    prop_oneof![
        Just(SecurityEventKind::FailedLogin),
        Just(SecurityEventKind::SuspiciousActivity),
        Just(SecurityEventKind::UnauthorizedAccess),
        "[a-z_]{1,12}".prop_map(SecurityEventKind::Other),
    ]
}

proptest! {
    #[test]
    fn score_never_drops_with_severity(kind in kind(), a in severity(), b in severity()) {
        let agent = SecurityAgent::new(Duration::from_secs(10), Arc::new(LogNotifier));
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let low_score = agent.anomaly_score(&SecurityEvent::new(kind.clone(), low, "e"));
        let high_score = agent.anomaly_score(&SecurityEvent::new(kind, high, "e"));
        prop_assert!(low_score <= high_score);
        prop_assert!(low_score > 0.0);
    }

    #[test]
    fn backoff_stays_within_cap(base_ms in 1u64..5_000, attempt in 1u32..40, cap_ms in 1u64..60_000) {
        let config = RetryConfig {
            max_retries: 3,
            retry_delay_ms: base_ms,
            exponential_backoff: true,
            max_backoff_ms: cap_ms,
        };
        let delay = backoff_delay(Duration::from_millis(base_ms), attempt, &config);
        prop_assert!(delay <= Duration::from_millis(cap_ms));
    }
}
