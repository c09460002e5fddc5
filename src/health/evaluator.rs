// src/health/evaluator.rs
use super::policy::{Threshold, ThresholdPolicy};
use super::probe::{
    round_to, CacheProbe, DatastoreProbe, HealthSignal, PoolStats, PoolStatsSource, ProbeError,
};
use super::report::{
    AvailabilityCheck, ComponentCheck, FailedCheck, HealthReport, LatencyCheck, PoolCheck, CACHE,
    DATABASE, DB_POOL,
};
use super::severity::{ComponentStatus, SeverityLevel};
use crate::metrics::{MetricsCollector, Timer};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Builds a [`HealthReport`] from live probes of the datastore, its
/// connection pool and the (optional) cache.
pub struct HealthEvaluator {
    datastore: Arc<dyn DatastoreProbe>,
    pool: Arc<dyn PoolStatsSource>,
    cache: Option<Arc<dyn CacheProbe>>,
    policy: ThresholdPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HealthEvaluator {
    pub fn new(
        datastore: Arc<dyn DatastoreProbe>,
        pool: Arc<dyn PoolStatsSource>,
        cache: Option<Arc<dyn CacheProbe>>,
        policy: ThresholdPolicy,
    ) -> Self {
        Self {
            datastore,
            pool,
            cache,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Probe every dependency and classify the results. Never fails: each
    /// probe is isolated and its failure is folded into the report.
    pub async fn evaluate(&self) -> HealthReport {
        // Snapshot the pool before probing: a pool may hand the probe's
        // connection back asynchronously, which would count it as checked out.
        let pool_outcome = self.pool.pool_stats();

        let datastore = async {
            let timer = Timer::new();
            let outcome = self.datastore.probe().await;
            (outcome, timer.elapsed())
        };
        let cache = async {
            let timer = Timer::new();
            let outcome = match &self.cache {
                Some(cache) => cache.ping().await,
                None => Err(ProbeError::NotConfigured),
            };
            (outcome, timer.elapsed())
        };

        let ((db_outcome, db_elapsed), (cache_outcome, cache_elapsed)) =
            tokio::join!(datastore, cache);

        if let Err(e) = &db_outcome {
            warn!(component = DATABASE, error = %e, "Datastore probe failed");
        }
        match &cache_outcome {
            Err(ProbeError::NotConfigured) => {
                debug!(component = CACHE, "No cache client configured")
            }
            Err(e) => warn!(component = CACHE, error = %e, "Cache probe failed"),
            Ok(()) => {}
        }
        if let Err(e) = &pool_outcome {
            error!(component = DB_POOL, error = %e, "Pool inspection failed");
        }

        let mut checks = BTreeMap::new();
        checks.insert(
            DATABASE.to_string(),
            evaluate_datastore(&db_outcome, &self.policy.db_latency),
        );
        checks.insert(CACHE.to_string(), evaluate_cache(&cache_outcome));
        checks.insert(
            DB_POOL.to_string(),
            evaluate_pool(&pool_outcome, &self.policy.db_pool_utilization),
        );

        let status = SeverityLevel::aggregate(checks.values().map(ComponentCheck::health));

        if let Some(metrics) = &self.metrics {
            metrics.record_probe(DATABASE, db_elapsed);
            metrics.record_probe(CACHE, cache_elapsed);
            for (component, check) in &checks {
                metrics.update_component_health(component, check.health());
            }
            metrics.update_overall_health(status);
        }

        if status == SeverityLevel::Healthy {
            debug!(status = %status, "Health evaluation complete");
        } else {
            warn!(status = %status, "Health evaluation reports a problem");
        }

        HealthReport {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}

/// Milliseconds rounded to two decimals.
pub fn latency_ms(elapsed: Duration) -> f64 {
    round_to(elapsed.as_secs_f64() * 1000.0, 2)
}

pub fn evaluate_datastore(
    outcome: &Result<Duration, ProbeError>,
    threshold: &Threshold,
) -> ComponentCheck {
    let signal = match outcome {
        Ok(elapsed) => HealthSignal::reachable(Some(latency_ms(*elapsed))),
        Err(_) => HealthSignal::unreachable(),
    };

    ComponentCheck::Latency(LatencyCheck {
        status: if signal.reachable {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        health: signal.classify(threshold),
        latency_ms: signal.measured_value,
        thresholds: *threshold,
    })
}

pub fn evaluate_cache(outcome: &Result<(), ProbeError>) -> ComponentCheck {
    let signal = match outcome {
        Ok(()) => HealthSignal::reachable(None),
        Err(_) => HealthSignal::unreachable(),
    };

    ComponentCheck::Availability(AvailabilityCheck {
        status: if signal.reachable {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        health: signal.classify_optional(),
    })
}

pub fn evaluate_pool(
    outcome: &Result<PoolStats, ProbeError>,
    threshold: &Threshold,
) -> ComponentCheck {
    match outcome {
        Ok(stats) => {
            let utilization = stats.utilization_percent();
            let signal = HealthSignal::reachable(Some(utilization));

            ComponentCheck::Pool(PoolCheck {
                health: signal.classify(threshold),
                size: stats.pool_size,
                checked_in: stats.checked_in,
                checked_out: stats.checked_out,
                overflow: stats.overflow,
                total_capacity: stats.total_capacity(),
                utilization_percent: utilization,
                thresholds: *threshold,
            })
        }
        Err(e) => ComponentCheck::Failed(FailedCheck {
            health: SeverityLevel::Critical,
            status: ComponentStatus::Error,
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedDatastore(Result<Duration, ProbeError>);

    #[async_trait]
    impl DatastoreProbe for FixedDatastore {
        async fn probe(&self) -> Result<Duration, ProbeError> {
            self.0.clone()
        }
    }

    struct FixedCache(bool);

    #[async_trait]
    impl CacheProbe for FixedCache {
        async fn ping(&self) -> Result<(), ProbeError> {
            if self.0 {
                Ok(())
            } else {
                Err(ProbeError::Unreachable("connection refused".into()))
            }
        }
    }

    struct FixedPool(Result<PoolStats, ProbeError>);

    impl PoolStatsSource for FixedPool {
        fn pool_stats(&self) -> Result<PoolStats, ProbeError> {
            self.0.clone()
        }
    }

    /// Single-connection pool whose datastore probe returns its connection
    /// from a spawned task, after the probe has already completed.
    #[derive(Default)]
    struct DeferredReleasePool {
        checked_out: AtomicU32,
    }

    #[async_trait]
    impl DatastoreProbe for Arc<DeferredReleasePool> {
        async fn probe(&self) -> Result<Duration, ProbeError> {
            self.checked_out.fetch_add(1, Ordering::SeqCst);
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.checked_out.fetch_sub(1, Ordering::SeqCst);
            });
            Ok(Duration::from_millis(3))
        }
    }

    impl PoolStatsSource for Arc<DeferredReleasePool> {
        fn pool_stats(&self) -> Result<PoolStats, ProbeError> {
            let checked_out = self.checked_out.load(Ordering::SeqCst);
            Ok(PoolStats {
                pool_size: 1,
                checked_out,
                checked_in: 1 - checked_out,
                overflow: 0,
            })
        }
    }

    fn pool(checked_out: u32) -> Result<PoolStats, ProbeError> {
        Ok(PoolStats {
            pool_size: 10,
            checked_out,
            checked_in: 10 - checked_out,
            overflow: 0,
        })
    }

    fn evaluator(
        db: Result<Duration, ProbeError>,
        cache: Option<bool>,
        stats: Result<PoolStats, ProbeError>,
    ) -> HealthEvaluator {
        HealthEvaluator::new(
            Arc::new(FixedDatastore(db)),
            Arc::new(FixedPool(stats)),
            cache.map(|up| Arc::new(FixedCache(up)) as Arc<dyn CacheProbe>),
            ThresholdPolicy::default(),
        )
    }

    fn ms(value: u64) -> Result<Duration, ProbeError> {
        Ok(Duration::from_millis(value))
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let report = evaluator(ms(5), Some(true), pool(2)).evaluate().await;

        assert_eq!(report.status, SeverityLevel::Healthy);
        assert_eq!(report.checks.len(), 3);
        for check in report.checks.values() {
            assert_eq!(check.health(), SeverityLevel::Healthy);
        }
    }

    #[tokio::test]
    async fn test_cache_down_is_degraded() {
        let report = evaluator(ms(5), Some(false), pool(2)).evaluate().await;

        assert_eq!(report.status, SeverityLevel::Degraded);
        assert_eq!(
            report.check(CACHE),
            Some(&ComponentCheck::Availability(AvailabilityCheck {
                status: ComponentStatus::Down,
                health: SeverityLevel::Degraded,
            }))
        );
    }

    #[tokio::test]
    async fn test_missing_cache_client_is_degraded() {
        let report = evaluator(ms(5), None, pool(2)).evaluate().await;
        assert_eq!(report.status, SeverityLevel::Degraded);
    }

    #[tokio::test]
    async fn test_datastore_down_is_critical() {
        let report = evaluator(
            Err(ProbeError::Timeout(Duration::from_secs(5))),
            Some(true),
            pool(2),
        )
        .evaluate()
        .await;

        assert_eq!(report.status, SeverityLevel::Critical);
        match report.check(DATABASE) {
            Some(ComponentCheck::Latency(check)) => {
                assert_eq!(check.status, ComponentStatus::Down);
                assert_eq!(check.health, SeverityLevel::Critical);
                assert_eq!(check.latency_ms, None);
            }
            other => panic!("unexpected database check: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_degraded_outranks_warning() {
        let report = evaluator(ms(150), Some(false), pool(2)).evaluate().await;

        assert_eq!(report.check(DATABASE).map(|c| c.health()), Some(SeverityLevel::Warning));
        assert_eq!(report.status, SeverityLevel::Degraded);
    }

    #[tokio::test]
    async fn test_pool_inspection_failure() {
        let report = evaluator(
            ms(5),
            Some(true),
            Err(ProbeError::Inspection("pool is closed".into())),
        )
        .evaluate()
        .await;

        assert_eq!(report.status, SeverityLevel::Critical);
        assert_eq!(
            report.check(DB_POOL),
            Some(&ComponentCheck::Failed(FailedCheck {
                health: SeverityLevel::Critical,
                status: ComponentStatus::Error,
                error: "inspection failed: pool is closed".to_string(),
            }))
        );
    }

    #[tokio::test]
    async fn test_everything_down_still_reports() {
        let report = evaluator(
            Err(ProbeError::Unreachable("refused".into())),
            Some(false),
            Err(ProbeError::Inspection("gone".into())),
        )
        .evaluate()
        .await;

        assert_eq!(report.status, SeverityLevel::Critical);
        assert_eq!(report.checks.len(), 3);
    }

    #[tokio::test]
    async fn test_evaluation_is_idempotent() {
        let evaluator = evaluator(ms(120), Some(true), pool(7));
        let first = evaluator.evaluate().await;
        let second = evaluator.evaluate().await;

        assert_eq!(first.status, second.status);
        assert_eq!(first.checks, second.checks);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_own_probe_connection_is_not_counted() {
        let shared = Arc::new(DeferredReleasePool::default());
        let evaluator = HealthEvaluator::new(
            Arc::new(shared.clone()),
            Arc::new(shared.clone()),
            Some(Arc::new(FixedCache(true)) as Arc<dyn CacheProbe>),
            ThresholdPolicy::default(),
        );

        for _ in 0..5 {
            let report = evaluator.evaluate().await;
            match &report.checks[DB_POOL] {
                ComponentCheck::Pool(check) => {
                    assert_eq!(check.checked_out, 0);
                    assert_eq!(check.utilization_percent, 0.0);
                    assert_eq!(check.health, SeverityLevel::Healthy);
                }
                other => panic!("expected pool check, got {other:?}"),
            }
            assert_eq!(report.status, SeverityLevel::Healthy);
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_metrics_are_updated() {
        let registry = MetricsRegistry::new().unwrap();
        let evaluator = evaluator(ms(5), Some(false), pool(9)).with_metrics(registry.collector());

        let report = evaluator.evaluate().await;
        assert_eq!(report.status, SeverityLevel::Critical);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains("storefront_health_overall_severity 3"));
        assert!(text.contains("storefront_health_component_severity{component=\"db_pool\"} 3"));
        assert!(text.contains("storefront_health_component_severity{component=\"redis\"} 2"));
    }

    #[test]
    fn test_latency_rounding_and_tiers() {
        let threshold = ThresholdPolicy::default().db_latency;

        let check = evaluate_datastore(&Ok(Duration::from_micros(499_990)), &threshold);
        match check {
            ComponentCheck::Latency(c) => {
                assert_eq!(c.latency_ms, Some(499.99));
                assert_eq!(c.health, SeverityLevel::Warning);
            }
            other => panic!("unexpected check: {other:?}"),
        }

        assert_eq!(
            evaluate_datastore(&ms(100), &threshold).health(),
            SeverityLevel::Warning
        );
        assert_eq!(
            evaluate_datastore(&ms(500), &threshold).health(),
            SeverityLevel::Critical
        );
        assert_eq!(
            evaluate_datastore(&ms(50), &threshold).health(),
            SeverityLevel::Healthy
        );
        assert_eq!(latency_ms(Duration::from_nanos(1_234_567)), 1.23);
    }

    #[test]
    fn test_pool_tiers() {
        let threshold = ThresholdPolicy::default().db_pool_utilization;

        assert_eq!(evaluate_pool(&pool(6), &threshold).health(), SeverityLevel::Healthy);
        assert_eq!(evaluate_pool(&pool(7), &threshold).health(), SeverityLevel::Warning);
        assert_eq!(evaluate_pool(&pool(9), &threshold).health(), SeverityLevel::Critical);

        let empty = Ok(PoolStats {
            pool_size: 0,
            checked_out: 0,
            checked_in: 0,
            overflow: 0,
        });
        match evaluate_pool(&empty, &threshold) {
            ComponentCheck::Pool(c) => {
                assert_eq!(c.utilization_percent, 0.0);
                assert_eq!(c.health, SeverityLevel::Healthy);
            }
            other => panic!("unexpected check: {other:?}"),
        }
    }

    #[test]
    fn test_report_wire_shape() {
        let threshold = ThresholdPolicy::default().db_latency;
        let down = serde_json::to_value(evaluate_datastore(
            &Err(ProbeError::Unreachable("refused".into())),
            &threshold,
        ))
        .unwrap();
        assert_eq!(
            down,
            serde_json::json!({
                "status": "down",
                "health": "critical",
                "latency_ms": null,
                "thresholds": {"warning": 100.0, "critical": 500.0}
            })
        );

        let failed = serde_json::to_value(evaluate_pool(
            &Err(ProbeError::Inspection("boom".into())),
            &ThresholdPolicy::default().db_pool_utilization,
        ))
        .unwrap();
        assert_eq!(
            failed,
            serde_json::json!({
                "health": "critical",
                "status": "error",
                "error": "inspection failed: boom"
            })
        );
    }
}
