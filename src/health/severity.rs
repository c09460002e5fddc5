// src/health/severity.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Health classification shared by components and the overall report.
///
/// Variants are declared in aggregation order, so `Ord` gives
/// `Healthy < Warning < Degraded < Critical` and the overall level is
/// simply the maximum of the component levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Healthy,
    Warning,
    /// An optional dependency is unavailable.
    Degraded,
    Critical,
}

impl SeverityLevel {
    /// Combine component levels: critical > degraded > warning > healthy.
    /// An empty set is healthy.
    pub fn aggregate<I>(levels: I) -> Self
    where
        I: IntoIterator<Item = SeverityLevel>,
    {
        levels.into_iter().max().unwrap_or(SeverityLevel::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Healthy => "healthy",
            SeverityLevel::Warning => "warning",
            SeverityLevel::Degraded => "degraded",
            SeverityLevel::Critical => "critical",
        }
    }

    /// Numeric form for gauges (0=healthy .. 3=critical).
    pub fn as_gauge(&self) -> i64 {
        match self {
            SeverityLevel::Healthy => 0,
            SeverityLevel::Warning => 1,
            SeverityLevel::Degraded => 2,
            SeverityLevel::Critical => 3,
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a probed dependency answered, and if not, how it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    Error,
}
