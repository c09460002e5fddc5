// src/health/probe.rs
//
// Seams between the evaluator and the dependencies it inspects. Each probe
// reports an explicit outcome; the evaluator never sees a panic or a
// framework error type.

use super::policy::Threshold;
use super::severity::SeverityLevel;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("dependency unreachable: {0}")]
    Unreachable(String),

    #[error("no client configured")]
    NotConfigured,

    #[error("inspection failed: {0}")]
    Inspection(String),
}

/// Liveness round-trip against the relational datastore.
///
/// Implementations must bound the call with their own timeout so that a
/// hung dependency surfaces as `ProbeError::Timeout`.
#[async_trait]
pub trait DatastoreProbe: Send + Sync {
    /// Elapsed wall-clock time of a successful round-trip.
    async fn probe(&self) -> Result<Duration, ProbeError>;
}

/// Liveness check against the cache store.
#[async_trait]
pub trait CacheProbe: Send + Sync {
    async fn ping(&self) -> Result<(), ProbeError>;
}

/// Non-blocking read of the connection pool's counters.
pub trait PoolStatsSource: Send + Sync {
    fn pool_stats(&self) -> Result<PoolStats, ProbeError>;
}

/// Snapshot of connection pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_size: u32,
    pub checked_out: u32,
    pub checked_in: u32,
    /// May be negative while the pool has not grown to its base size.
    pub overflow: i64,
}

impl PoolStats {
    pub fn total_capacity(&self) -> u64 {
        self.pool_size as u64 + self.overflow.max(0) as u64
    }

    /// Checked-out share of capacity, rounded to one decimal. Zero when the
    /// pool has no capacity.
    pub fn utilization_percent(&self) -> f64 {
        let capacity = self.total_capacity();
        if capacity == 0 {
            return 0.0;
        }
        round_to(self.checked_out as f64 / capacity as f64 * 100.0, 1)
    }
}

/// Raw per-component observation fed into classification.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSignal {
    pub measured_value: Option<f64>,
    pub reachable: bool,
}

impl HealthSignal {
    pub fn reachable(measured_value: Option<f64>) -> Self {
        Self {
            measured_value,
            reachable: true,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            measured_value: None,
            reachable: false,
        }
    }

    /// Severity for a required, measured dependency.
    pub fn classify(&self, threshold: &Threshold) -> SeverityLevel {
        match (self.reachable, self.measured_value) {
            (false, _) => SeverityLevel::Critical,
            (true, Some(value)) => threshold.classify(value),
            (true, None) => SeverityLevel::Healthy,
        }
    }

    /// Severity for an optional dependency: losing it degrades the system
    /// but is never critical.
    pub fn classify_optional(&self) -> SeverityLevel {
        if self.reachable {
            SeverityLevel::Healthy
        } else {
            SeverityLevel::Degraded
        }
    }
}

/// Rounds halves to even, so `6.25` at one decimal gives `6.2`.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}
