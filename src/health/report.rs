// src/health/report.rs
use super::policy::Threshold;
use super::severity::{ComponentStatus, SeverityLevel};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

pub const DATABASE: &str = "database";
pub const CACHE: &str = "redis";
pub const DB_POOL: &str = "db_pool";

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: SeverityLevel,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ComponentCheck>,
}

impl HealthReport {
    pub fn check(&self, component: &str) -> Option<&ComponentCheck> {
        self.checks.get(component)
    }
}

/// Per-component evaluation as it appears under `checks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ComponentCheck {
    Latency(LatencyCheck),
    Availability(AvailabilityCheck),
    Pool(PoolCheck),
    Failed(FailedCheck),
}

impl ComponentCheck {
    pub fn health(&self) -> SeverityLevel {
        match self {
            ComponentCheck::Latency(c) => c.health,
            ComponentCheck::Availability(c) => c.health,
            ComponentCheck::Pool(c) => c.health,
            ComponentCheck::Failed(c) => c.health,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyCheck {
    pub status: ComponentStatus,
    pub health: SeverityLevel,
    /// `null` when the probe failed; never reported as zero.
    pub latency_ms: Option<f64>,
    pub thresholds: Threshold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityCheck {
    pub status: ComponentStatus,
    pub health: SeverityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolCheck {
    pub health: SeverityLevel,
    pub size: u32,
    pub checked_in: u32,
    pub checked_out: u32,
    pub overflow: i64,
    pub total_capacity: u64,
    pub utilization_percent: f64,
    pub thresholds: Threshold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCheck {
    pub health: SeverityLevel,
    pub status: ComponentStatus,
    pub error: String,
}

fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}
