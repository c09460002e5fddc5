// src/health/policy.rs
use super::severity::SeverityLevel;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Two-tier threshold. Values at or above `critical_threshold` are
/// critical, at or above `warning_threshold` a warning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(rename = "warning", alias = "warning_threshold")]
    pub warning_threshold: f64,
    #[serde(rename = "critical", alias = "critical_threshold")]
    pub critical_threshold: f64,
}

impl Threshold {
    pub const fn new(warning_threshold: f64, critical_threshold: f64) -> Self {
        Self {
            warning_threshold,
            critical_threshold,
        }
    }

    pub fn classify(&self, value: f64) -> SeverityLevel {
        if value >= self.critical_threshold {
            SeverityLevel::Critical
        } else if value >= self.warning_threshold {
            SeverityLevel::Warning
        } else {
            SeverityLevel::Healthy
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.warning_threshold.is_finite() || !self.critical_threshold.is_finite() {
            bail!("{name} thresholds must be finite numbers");
        }
        if self.warning_threshold < 0.0 {
            bail!("{name} warning threshold must not be negative");
        }
        if self.warning_threshold > self.critical_threshold {
            bail!(
                "{name} warning threshold ({}) exceeds critical threshold ({})",
                self.warning_threshold,
                self.critical_threshold
            );
        }
        Ok(())
    }
}

/// Static thresholds for the measured components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    /// Datastore round-trip latency, milliseconds.
    pub db_latency: Threshold,
    /// Connection pool utilization, percent.
    pub db_pool_utilization: Threshold,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            db_latency: Threshold::new(100.0, 500.0),
            db_pool_utilization: Threshold::new(70.0, 90.0),
        }
    }
}

impl ThresholdPolicy {
    pub fn validate(&self) -> Result<()> {
        self.db_latency.validate("db_latency")?;
        self.db_pool_utilization.validate("db_pool_utilization")?;
        Ok(())
    }
}
