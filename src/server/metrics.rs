//! Server runtime metrics.
//!
//! Plain atomic counters shared across connection tasks. No locks on the
//! hot path; readers take a point-in-time snapshot.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Runtime counters for a server instance.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    active_connections: AtomicI64,
    errors_total: AtomicU64,
    errors_4xx: AtomicU64,
    errors_5xx: AtomicU64,
    total_latency_ns: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub active_connections: i64,
    pub errors_total: u64,
    pub errors_4xx: u64,
    pub errors_5xx: u64,
    pub average_latency: Duration,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed request with its status code and latency.
    pub fn record_request(&self, status_code: u16, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);

        match status_code {
            400..=499 => {
                self.errors_4xx.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.errors_5xx.fetch_add(1, Ordering::Relaxed);
                self.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Mean latency across all recorded requests.
    pub fn average_latency(&self) -> Duration {
        let total = self.requests_total.load(Ordering::Relaxed);
        if total == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / total)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            errors_4xx: self.errors_4xx.load(Ordering::Relaxed),
            errors_5xx: self.errors_5xx.load(Ordering::Relaxed),
            average_latency: self.average_latency(),
        }
    }
}
