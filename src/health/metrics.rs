//! Per-destination call counters.
//!
//! Sends record outcomes far more often than the health monitor reads them,
//! so the provided implementation keeps lock-free atomic cells per
//! destination and lets the monitor take cheap point-in-time snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::reliability::ErrorKind;

/// Cumulative counters for one destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestinationCounters {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Sum of call durations, in microseconds.
    pub total_duration_us: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
}

impl DestinationCounters {
    /// Counters accumulated since `earlier` was taken.
    ///
    /// Saturating: a reset counter reads as an empty window rather than a
    /// huge one.
    pub fn delta_since(&self, earlier: &Self) -> Self {
        let mut errors_by_kind = BTreeMap::new();
        for (kind, count) in &self.errors_by_kind {
            let prior = earlier.errors_by_kind.get(kind).copied().unwrap_or(0);
            let delta = count.saturating_sub(prior);
            if delta > 0 {
                errors_by_kind.insert(kind.clone(), delta);
            }
        }
        Self {
            calls: self.calls.saturating_sub(earlier.calls),
            successes: self.successes.saturating_sub(earlier.successes),
            failures: self.failures.saturating_sub(earlier.failures),
            total_duration_us: self.total_duration_us.saturating_sub(earlier.total_duration_us),
            errors_by_kind,
        }
    }

    /// Failure share in percent; 0 for an empty window, never NaN.
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64 * 100.0
        }
    }

    /// Success share in percent; 100 for an empty window.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            100.0
        } else {
            self.successes as f64 / self.calls as f64 * 100.0
        }
    }

    /// Mean call duration in milliseconds; 0 for an empty window.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_us as f64 / self.calls as f64 / 1000.0
        }
    }
}

/// Sink for call outcomes, read back by the health monitor.
///
/// Implementations must be thread-safe; recording happens on every send
/// path concurrently with snapshot reads.
pub trait MetricsSink: Send + Sync + 'static {
    /// Record one terminal call outcome against a destination.
    fn record_call(
        &self,
        destination: &str,
        success: bool,
        duration: Duration,
        error_kind: Option<ErrorKind>,
    );

    /// Cumulative counters for a destination. Unknown destinations read as
    /// all zeroes.
    fn snapshot(&self, destination: &str) -> DestinationCounters;

    /// Destinations that have recorded at least one call.
    fn destinations(&self) -> Vec<String>;
}

#[derive(Default)]
struct Cells {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_duration_us: AtomicU64,
    errors_by_kind: DashMap<ErrorKind, AtomicU64>,
}

/// In-memory atomic metrics sink.
#[derive(Clone, Default)]
pub struct AtomicMetrics {
    cells: Arc<DashMap<String, Arc<Cells>>>,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn cells_for(&self, destination: &str) -> Arc<Cells> {
        if let Some(existing) = self.cells.get(destination) {
            return Arc::clone(&existing);
        }
        self.cells
            .entry(destination.to_string())
            .or_default()
            .clone()
    }
}

impl MetricsSink for AtomicMetrics {
    fn record_call(
        &self,
        destination: &str,
        success: bool,
        duration: Duration,
        error_kind: Option<ErrorKind>,
    ) {
        let cells = self.cells_for(destination);
        cells.calls.fetch_add(1, Ordering::Relaxed);
        cells
            .total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            cells.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            cells.failures.fetch_add(1, Ordering::Relaxed);
            if let Some(kind) = error_kind {
                cells
                    .errors_by_kind
                    .entry(kind)
                    .or_default()
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self, destination: &str) -> DestinationCounters {
        let Some(cells) = self.cells.get(destination) else {
            return DestinationCounters::default();
        };
        let errors_by_kind = cells
            .errors_by_kind
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect();
        DestinationCounters {
            calls: cells.calls.load(Ordering::Relaxed),
            successes: cells.successes.load(Ordering::Relaxed),
            failures: cells.failures.load(Ordering::Relaxed),
            total_duration_us: cells.total_duration_us.load(Ordering::Relaxed),
            errors_by_kind,
        }
    }

    fn destinations(&self) -> Vec<String> {
        self.cells.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unknown_destination_reads_zero() {
        let metrics = AtomicMetrics::new();
        let counters = metrics.snapshot("legacy");
        assert_eq!(counters, DestinationCounters::default());
        assert_eq!(counters.error_rate(), 0.0);
        assert_eq!(counters.success_rate(), 100.0);
    }

    #[test]
    fn test_record_accumulates_by_outcome() {
        let metrics = AtomicMetrics::new();
        metrics.record_call("new", true, Duration::from_millis(10), None);
        metrics.record_call("new", true, Duration::from_millis(20), None);
        metrics.record_call(
            "new",
            false,
            Duration::from_millis(30),
            Some(ErrorKind::ServerError),
        );

        let counters = metrics.snapshot("new");
        assert_eq!(counters.calls, 3);
        assert_eq!(counters.successes, 2);
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.errors_by_kind.get("server_error"), Some(&1));
        assert!((counters.error_rate() - 33.333).abs() < 0.01);
        assert_eq!(counters.avg_latency_ms(), 20.0);
    }

    #[test]
    fn test_destinations_are_isolated() {
        let metrics = AtomicMetrics::new();
        metrics.record_call("legacy", false, Duration::ZERO, Some(ErrorKind::TimeoutError));
        metrics.record_call("new", true, Duration::ZERO, None);

        assert_eq!(metrics.snapshot("legacy").failures, 1);
        assert_eq!(metrics.snapshot("new").failures, 0);
        let mut destinations = metrics.destinations();
        destinations.sort();
        assert_eq!(destinations, vec!["legacy", "new"]);
    }

    #[test]
    fn test_delta_since_subtracts_a_window() {
        let metrics = AtomicMetrics::new();
        metrics.record_call("new", true, Duration::from_millis(5), None);
        let first = metrics.snapshot("new");

        metrics.record_call("new", false, Duration::from_millis(5), Some(ErrorKind::BadGateway));
        metrics.record_call("new", false, Duration::from_millis(5), Some(ErrorKind::BadGateway));

        let delta = metrics.snapshot("new").delta_since(&first);
        assert_eq!(delta.calls, 2);
        assert_eq!(delta.successes, 0);
        assert_eq!(delta.failures, 2);
        assert_eq!(delta.errors_by_kind.get("bad_gateway"), Some(&2));
        assert_eq!(delta.error_rate(), 100.0);
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        let metrics = AtomicMetrics::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        metrics.record_call(
                            "new",
                            i % 2 == 0,
                            Duration::from_micros(10),
                            (i % 2 != 0).then_some(ErrorKind::NetworkError),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counters = metrics.snapshot("new");
        assert_eq!(counters.calls, 800);
        assert_eq!(counters.successes, 400);
        assert_eq!(counters.failures, 400);
        assert_eq!(counters.errors_by_kind.get("network_error"), Some(&400));
    }
}
