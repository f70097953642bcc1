//! Random collaborators for running the supervisor without real infrastructure

use rand::Rng;
use std::ops::Range;
use std::time::Duration;
use warden_core::{
    AgentError, HealthProbe, MetricSample, MetricsSource, ProbeReading, SecurityEvent,
    SecurityEventKind, Severity,
};

/// Metric source drawing each value uniformly from a range
#[derive(Debug, Clone)]
pub(crate) struct SimulatedMetrics {
    ranges: Vec<(&'static str, Range<f64>)>,
}

impl SimulatedMetrics {
    pub(crate) fn new(ranges: &[(&'static str, Range<f64>)]) -> Self {
        Self {
            ranges: ranges.to_vec(),
        }
    }

    pub(crate) fn performance() -> Self {
        Self::new(&[
            ("response_time", 100.0..1500.0),
            ("throughput", 40.0..200.0),
            ("memory_usage", 40.0..97.0),
            ("cpu_usage", 20.0..95.0),
        ])
    }

    pub(crate) fn errors() -> Self {
        Self::new(&[
            ("error_rate", 0.0..8.0),
            ("exception_count", 0.0..20.0),
            ("timeout_count", 0.0..8.0),
        ])
    }

    pub(crate) fn security() -> Self {
        Self::new(&[
            ("failed_logins", 0.0..10.0),
            ("suspicious_activity", 0.0..5.0),
            ("unauthorized_access", 0.0..2.0),
        ])
    }

    pub(crate) fn business() -> Self {
        Self::new(&[
            ("conversion_rate", 1.5..5.0),
            ("user_engagement", 25.0..80.0),
            ("data_quality", 80.0..100.0),
        ])
    }

    pub(crate) fn system() -> Self {
        Self::new(&[
            ("cpu_usage", 10.0..85.0),
            ("memory_usage", 30.0..92.0),
            ("disk_usage", 40.0..80.0),
        ])
    }
}

#[async_trait::async_trait]
impl MetricsSource for SimulatedMetrics {
    async fn collect(&self) -> Result<MetricSample, AgentError> {
        let mut rng = rand::thread_rng();
        Ok(self
            .ranges
            .iter()
            .map(|(name, range)| ((*name).to_string(), rng.gen_range(range.clone())))
            .collect())
    }
}

/// Dependency probe with jittered latency and an occasional outage
#[derive(Debug, Clone)]
pub(crate) struct SimulatedProbe {
    latency_ms: Range<u64>,
    failure_rate: f64,
}

impl SimulatedProbe {
    pub(crate) fn new(latency_ms: Range<u64>, failure_rate: f64) -> Self {
        Self {
            latency_ms,
            failure_rate,
        }
    }
}

#[async_trait::async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self) -> Result<ProbeReading, AgentError> {
        let (down, latency) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(self.failure_rate),
                Duration::from_millis(rng.gen_range(self.latency_ms.clone())),
            )
        };
        tokio::time::sleep(latency).await;
        if down {
            return Err(AgentError::Collaborator("connection refused".into()));
        }
        Ok(ProbeReading::new(latency))
    }
}

/// A plausible inbound security event
pub(crate) fn random_security_event() -> SecurityEvent {
    let mut rng = rand::thread_rng();
    let kind = match rng.gen_range(0..10) {
        0..=5 => SecurityEventKind::FailedLogin,
        6..=8 => SecurityEventKind::SuspiciousActivity,
        _ => SecurityEventKind::UnauthorizedAccess,
    };
    let severity = match rng.gen_range(0..10) {
        0..=3 => Severity::Low,
        4..=6 => Severity::Medium,
        7..=8 => Severity::High,
        _ => Severity::Critical,
    };
    let source = format!("203.0.113.{}", rng.gen_range(1..16));
    SecurityEvent::new(kind.clone(), severity, format!("{kind} observed from {source}")).with_source(source)
}
