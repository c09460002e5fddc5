// src/metrics/collector.rs
use crate::health::SeverityLevel;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Text exposition of every registered family.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub rate_limited_total: IntCounter,

    // Health metrics
    pub health_checks_total: IntCounterVec,
    pub health_component_severity: IntGaugeVec,
    pub health_overall_severity: IntGauge,
    pub health_probe_duration_seconds: HistogramVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("storefront_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "storefront_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "path"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let rate_limited_total = IntCounter::new(
            "storefront_rate_limited_total",
            "Requests rejected by the rate limiter",
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        let health_checks_total = IntCounterVec::new(
            Opts::new(
                "storefront_health_checks_total",
                "Health evaluations by overall result",
            ),
            &["status"],
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        let health_component_severity = IntGaugeVec::new(
            Opts::new(
                "storefront_health_component_severity",
                "Component severity (0=healthy, 1=warning, 2=degraded, 3=critical)",
            ),
            &["component"],
        )?;
        registry.register(Box::new(health_component_severity.clone()))?;

        let health_overall_severity = IntGauge::new(
            "storefront_health_overall_severity",
            "Overall severity (0=healthy, 1=warning, 2=degraded, 3=critical)",
        )?;
        registry.register(Box::new(health_overall_severity.clone()))?;

        let health_probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "storefront_health_probe_duration_seconds",
                "Dependency probe duration in seconds",
            ),
            &["component"],
        )?;
        registry.register(Box::new(health_probe_duration_seconds.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            rate_limited_total,
            health_checks_total,
            health_component_severity,
            health_overall_severity,
            health_probe_duration_seconds,
        })
    }

    pub fn record_request(&self, method: &str, path: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, path, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.inc();
    }

    pub fn record_probe(&self, component: &str, duration: Duration) {
        self.health_probe_duration_seconds
            .with_label_values(&[component])
            .observe(duration.as_secs_f64());
    }

    pub fn update_component_health(&self, component: &str, level: SeverityLevel) {
        self.health_component_severity
            .with_label_values(&[component])
            .set(level.as_gauge());
    }

    pub fn update_overall_health(&self, level: SeverityLevel) {
        self.health_overall_severity.set(level.as_gauge());
        self.health_checks_total
            .with_label_values(&[level.as_str()])
            .inc();
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_health_families() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();

        collector.update_component_health("redis", SeverityLevel::Degraded);
        collector.update_overall_health(SeverityLevel::Degraded);
        collector.record_request("GET", "/health_check", 200, Duration::from_millis(3));

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains("storefront_health_component_severity{component=\"redis\"} 2"));
        assert!(text.contains("storefront_health_overall_severity 2"));
        assert!(text.contains("storefront_health_checks_total{status=\"degraded\"} 1"));
        assert!(text.contains("storefront_http_requests_total"));
    }
}
