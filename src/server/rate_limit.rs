// src/server/rate_limit.rs
use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::debug;

/// Fixed-window limiter keyed by client IP.
pub struct RateLimiter {
    calls: u32,
    period: Duration,
    windows: DashMap<IpAddr, Window>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets.
    pub retry_after: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            calls: config.calls,
            period: config.period(),
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, client: IpAddr) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> RateDecision {
        let mut window = self.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });

        let mut elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.period {
            window.started = now;
            window.count = 0;
            elapsed = Duration::ZERO;
        }
        let retry_after = self.period - elapsed;

        if window.count >= self.calls {
            return RateDecision {
                allowed: false,
                limit: self.calls,
                remaining: 0,
                retry_after,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            limit: self.calls,
            remaining: self.calls - window.count,
            retry_after,
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.period);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Periodically purge expired windows. Runs until the task is aborted.
    pub async fn run_purge(self: Arc<Self>) {
        let mut ticker = interval(self.period);
        loop {
            ticker.tick().await;
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed, remaining = self.tracked_clients(), "Purged rate limit windows");
            }
        }
    }
}
