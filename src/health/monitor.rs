//! Periodic health evaluation and rollback recommendation.
//!
//! The monitor ticks on a fixed interval, pulls counter deltas since its
//! previous tick from the metrics sink, and evaluates the alert thresholds.
//! A tick is one bounded unit of work; with `MissedTickBehavior::Skip` a
//! slow tick causes the next one to be skipped rather than queued. Critical
//! alerts produce a rollback recommendation; the monitor only invokes
//! `rollback` itself when `auto_rollback` is enabled.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::alerts::{Alert, AlertSeverity, AlertType, NotificationSink};
use super::metrics::{DestinationCounters, MetricsSink};
use crate::constants;
use crate::migration::MigrationStateMachine;
use crate::provider::ProviderKind;
use crate::reliability::CircuitBreaker;

/// Health monitor tunables.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// Overall error-rate percentage above which a Critical alert fires.
    pub rollback_threshold_pct: f64,
    /// Points the new provider's error rate may exceed the legacy baseline.
    pub regression_margin_pct: f64,
    /// Floor for the rolling new-provider success rate.
    pub sustained_success_floor_pct: f64,
    /// Snapshots in the rolling success-rate window.
    pub rolling_window: usize,
    /// Retained snapshots.
    pub history_limit: usize,
    /// Invoke `rollback` on Critical alerts instead of only recommending.
    pub auto_rollback: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(constants::HEALTH_INTERVAL_SECS),
            rollback_threshold_pct: constants::HEALTH_ROLLBACK_THRESHOLD_PCT,
            regression_margin_pct: constants::HEALTH_REGRESSION_MARGIN_PCT,
            sustained_success_floor_pct: constants::HEALTH_SUSTAINED_SUCCESS_FLOOR_PCT,
            rolling_window: constants::HEALTH_ROLLING_WINDOW,
            history_limit: constants::HEALTH_HISTORY_LIMIT,
            auto_rollback: false,
        }
    }
}

/// Aggregates for one destination within a tick window.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationWindow {
    pub calls: u64,
    pub error_rate: f64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub errors_by_kind: BTreeMap<String, u64>,
}

impl DestinationWindow {
    fn from_delta(delta: &DestinationCounters) -> Self {
        Self {
            calls: delta.calls,
            error_rate: delta.error_rate(),
            success_rate: delta.success_rate(),
            avg_latency_ms: delta.avg_latency_ms(),
            errors_by_kind: delta.errors_by_kind.clone(),
        }
    }
}

/// Result of one monitor tick.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_calls: u64,
    /// Overall failure share across destinations, in percent.
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub per_destination: BTreeMap<String, DestinationWindow>,
    pub triggered_alerts: Vec<Alert>,
    pub rollback_recommended: bool,
}

struct MonitorInner {
    last_seen: BTreeMap<String, DestinationCounters>,
    window_start: DateTime<Utc>,
    history: VecDeque<HealthSnapshot>,
}

/// Periodically evaluates provider health against fixed thresholds.
pub struct HealthMonitor {
    config: HealthConfig,
    metrics: Arc<dyn MetricsSink>,
    state: Arc<MigrationStateMachine>,
    breaker: CircuitBreaker,
    notifier: Arc<dyn NotificationSink>,
    inner: Mutex<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        metrics: Arc<dyn MetricsSink>,
        state: Arc<MigrationStateMachine>,
        breaker: CircuitBreaker,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            metrics,
            state,
            breaker,
            notifier,
            inner: Mutex::new(MonitorInner {
                last_seen: BTreeMap::new(),
                window_start: Utc::now(),
                history: VecDeque::new(),
            }),
        }
    }

    /// Tick forever at the configured interval.
    ///
    /// Ticks never overlap: a tick that outlasts the interval causes the
    /// next one to be skipped. Individual tick failures are logged and do
    /// not end the loop.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first window spans a full interval.
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = self.tick().await;
            debug!(
                total_calls = snapshot.total_calls,
                error_rate = snapshot.error_rate,
                alerts = snapshot.triggered_alerts.len(),
                "health tick complete"
            );
        }
    }

    /// Evaluate one window: pull deltas, apply thresholds, store a snapshot.
    pub async fn tick(&self) -> HealthSnapshot {
        let window_end = Utc::now();

        // Delta counters per destination since the previous tick. Both
        // providers are always evaluated even before their first call.
        let (window_start, deltas) = {
            let mut inner = self.inner.lock();
            let window_start = inner.window_start;
            inner.window_start = window_end;

            let mut destinations = self.metrics.destinations();
            for provider in [ProviderKind::Legacy, ProviderKind::New] {
                let name = provider.as_str().to_string();
                if !destinations.contains(&name) {
                    destinations.push(name);
                }
            }

            let mut deltas = BTreeMap::new();
            for destination in destinations {
                let current = self.metrics.snapshot(&destination);
                let prior = inner.last_seen.get(&destination).cloned().unwrap_or_default();
                deltas.insert(destination.clone(), current.delta_since(&prior));
                inner.last_seen.insert(destination, current);
            }
            (window_start, deltas)
        };

        let mut total = DestinationCounters::default();
        for delta in deltas.values() {
            total.calls += delta.calls;
            total.successes += delta.successes;
            total.failures += delta.failures;
            total.total_duration_us += delta.total_duration_us;
            for (kind, count) in &delta.errors_by_kind {
                *total.errors_by_kind.entry(kind.clone()).or_default() += count;
            }
        }

        let alerts = self.evaluate(&total, &deltas);
        let rollback_recommended = alerts
            .iter()
            .any(|alert| alert.severity == AlertSeverity::Critical);

        let snapshot = HealthSnapshot {
            window_start,
            window_end,
            total_calls: total.calls,
            error_rate: total.error_rate(),
            avg_latency_ms: total.avg_latency_ms(),
            errors_by_kind: total.errors_by_kind.clone(),
            per_destination: deltas
                .iter()
                .map(|(name, delta)| (name.clone(), DestinationWindow::from_delta(delta)))
                .collect(),
            triggered_alerts: alerts.clone(),
            rollback_recommended,
        };

        for alert in &alerts {
            self.notifier.notify(alert).await;
        }

        if rollback_recommended {
            self.handle_rollback_recommendation().await;
        }

        {
            let mut inner = self.inner.lock();
            inner.history.push_back(snapshot.clone());
            while inner.history.len() > self.config.history_limit.max(1) {
                inner.history.pop_front();
            }
        }

        snapshot
    }

    fn evaluate(
        &self,
        total: &DestinationCounters,
        deltas: &BTreeMap<String, DestinationCounters>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let error_rate = total.error_rate();
        if total.calls > 0 && error_rate > self.config.rollback_threshold_pct {
            alerts.push(Alert::critical(
                AlertType::HighErrorRate,
                format!(
                    "overall error rate {error_rate:.1}% exceeds rollback threshold {:.1}%",
                    self.config.rollback_threshold_pct
                ),
                error_rate,
                self.config.rollback_threshold_pct,
            ));
        }

        let empty = DestinationCounters::default();
        let new = deltas.get(ProviderKind::New.as_str()).unwrap_or(&empty);
        let legacy = deltas.get(ProviderKind::Legacy.as_str()).unwrap_or(&empty);
        if new.calls > 0 {
            let margin = new.error_rate() - legacy.error_rate();
            if margin > self.config.regression_margin_pct {
                alerts.push(Alert::warning(
                    AlertType::ErrorRateRegression,
                    format!(
                        "new provider error rate {:.1}% exceeds legacy baseline {:.1}% by more \
                         than {:.1} points",
                        new.error_rate(),
                        legacy.error_rate(),
                        self.config.regression_margin_pct
                    ),
                    new.error_rate(),
                    legacy.error_rate() + self.config.regression_margin_pct,
                ));
            }
        }

        if let Some(rolling) = self.rolling_new_success_rate(new) {
            if rolling < self.config.sustained_success_floor_pct {
                alerts.push(Alert::warning(
                    AlertType::LowSustainedSuccess,
                    format!(
                        "new provider success rate averaged {rolling:.1}% over the last {} \
                         windows, below the {:.1}% floor",
                        self.config.rolling_window, self.config.sustained_success_floor_pct
                    ),
                    rolling,
                    self.config.sustained_success_floor_pct,
                ));
            }
        }

        alerts
    }

    /// Mean new-provider success rate over the current window plus stored
    /// history. `None` until `rolling_window` windows with traffic exist.
    fn rolling_new_success_rate(&self, current: &DestinationCounters) -> Option<f64> {
        let mut rates: Vec<f64> = Vec::with_capacity(self.config.rolling_window);
        if current.calls > 0 {
            rates.push(current.success_rate());
        }

        let inner = self.inner.lock();
        for snapshot in inner.history.iter().rev() {
            if rates.len() >= self.config.rolling_window {
                break;
            }
            if let Some(window) = snapshot.per_destination.get(ProviderKind::New.as_str())
                && window.calls > 0
            {
                rates.push(window.success_rate);
            }
        }

        if rates.len() < self.config.rolling_window {
            return None;
        }
        Some(rates.iter().sum::<f64>() / rates.len() as f64)
    }

    async fn handle_rollback_recommendation(&self) {
        if !self.config.auto_rollback {
            warn!("health monitor recommends rollback; auto_rollback is disabled");
            return;
        }
        match self.state.rollback("automatic rollback: critical health alert").await {
            Ok(status) => {
                info!(phase = %status.phase, "automatic rollback executed");
            },
            Err(err) if err.is_guard_violation() => {
                // Nothing to roll back (already all-legacy).
                debug!(error = %err, "automatic rollback skipped");
            },
            Err(err) => {
                error!(error = %err, "automatic rollback failed");
            },
        }
    }

    /// Most recent snapshot, if any tick has run.
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.inner.lock().history.back().cloned()
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Circuit state per tracked destination.
    pub fn breaker_states(&self) -> Vec<(String, &'static str)> {
        self.breaker.all_states()
    }
}
