// src/health/mod.rs
mod evaluator;
mod policy;
mod probe;
mod report;
mod severity;

pub use evaluator::{evaluate_cache, evaluate_datastore, evaluate_pool, latency_ms, HealthEvaluator};
pub use policy::{Threshold, ThresholdPolicy};
pub use probe::{CacheProbe, DatastoreProbe, HealthSignal, PoolStats, PoolStatsSource, ProbeError};
pub use report::{
    AvailabilityCheck, ComponentCheck, FailedCheck, HealthReport, LatencyCheck, PoolCheck, CACHE,
    DATABASE, DB_POOL,
};
pub use severity::{ComponentStatus, SeverityLevel};
