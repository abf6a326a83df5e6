//! Per-destination circuit breaker.
//!
//! State transitions are read-then-write, so they are performed through
//! moka's atomic entry API: concurrent callers against the same destination
//! serialize their mutations instead of corrupting the failure count.
//!
//! ## States
//!
//! - **Closed**: normal operation, requests allowed
//! - **Open**: too many consecutive failures, requests fail fast
//! - **`HalfOpen`**: cooldown elapsed; probes are let through one at a time
//!   until `success_threshold` consecutive successes close the circuit
//!   (any probe failure reopens it)

use moka::ops::compute::Op;
use moka::sync::Cache as MokaCache;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::constants;

/// Circuit state for one destination.
#[derive(Debug, Clone)]
pub enum CircuitState {
    Closed {
        /// Consecutive failures observed while closed.
        failure_count: u32,
    },
    Open {
        /// When the circuit opened; the next probe is allowed at
        /// `opened_at + recovery_timeout`.
        opened_at: Instant,
        failure_count: u32,
    },
    HalfOpen {
        started_at: Instant,
        /// Consecutive successful probes observed so far.
        success_count: u32,
        /// Whether a probe is currently in flight.
        probe_in_flight: bool,
    },
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Closed { failure_count: 0 }
    }
}

impl PartialEq for CircuitState {
    // Timestamps are ignored; variant and counts must match.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                CircuitState::Closed { failure_count: a },
                CircuitState::Closed { failure_count: b },
            ) => a == b,
            (
                CircuitState::Open {
                    failure_count: a, ..
                },
                CircuitState::Open {
                    failure_count: b, ..
                },
            ) => a == b,
            (
                CircuitState::HalfOpen {
                    success_count: a, ..
                },
                CircuitState::HalfOpen {
                    success_count: b, ..
                },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for CircuitState {}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown before an open circuit allows a recovery probe.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Maximum time a probe may stay in flight before a new probe is allowed.
    pub probe_timeout: Duration,
    /// Maximum number of destinations to track (LRU eviction).
    pub max_tracked_keys: usize,
    /// Time after which idle destinations are evicted.
    pub idle_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: constants::CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_secs(constants::CIRCUIT_BREAKER_RECOVERY_SECS),
            success_threshold: constants::CIRCUIT_BREAKER_SUCCESS_THRESHOLD,
            probe_timeout: Duration::from_secs(constants::CIRCUIT_BREAKER_RECOVERY_SECS),
            max_tracked_keys: 64,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Error returned when the breaker rejects a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitOpenError {
    #[error("circuit open for '{key}' (consecutive failures: {failure_count})")]
    Open { key: String, failure_count: u32 },
    #[error("circuit for '{key}' is testing recovery (probe in flight)")]
    ProbeInFlight { key: String },
}

/// Per-destination circuit breaker.
///
/// Clone-cheap; clones share the underlying state.
#[derive(Clone)]
pub struct CircuitBreaker {
    states: MokaCache<Arc<str>, CircuitState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let states = MokaCache::builder()
            .max_capacity(config.max_tracked_keys as u64)
            .time_to_idle(config.idle_timeout)
            .build();
        Self { states, config }
    }

    /// Gate a request against the destination's circuit.
    ///
    /// Returns `Ok(())` when the request may proceed. An Open circuit past
    /// its recovery timeout transitions to `HalfOpen` and this request
    /// becomes the probe; otherwise the request is rejected without any
    /// attempt being made.
    pub fn check_request(&self, key: &str) -> Result<(), CircuitOpenError> {
        let recovery_timeout = self.config.recovery_timeout;
        let probe_timeout = self.config.probe_timeout;

        let mut rejection: Option<CircuitOpenError> = None;
        let cache_key: Arc<str> = Arc::from(key);
        self.states
            .entry_by_ref(&cache_key)
            .and_compute_with(|entry| match entry {
                // Unknown destination starts Closed: allowed.
                None => Op::Nop,
                Some(entry) => match entry.into_value() {
                    CircuitState::Closed { .. } => Op::Nop,
                    CircuitState::Open {
                        opened_at,
                        failure_count,
                    } => {
                        if opened_at.elapsed() >= recovery_timeout {
                            info!(destination = key, "circuit transitioning to half-open");
                            Op::Put(CircuitState::HalfOpen {
                                started_at: Instant::now(),
                                success_count: 0,
                                probe_in_flight: true,
                            })
                        } else {
                            rejection = Some(CircuitOpenError::Open {
                                key: key.to_string(),
                                failure_count,
                            });
                            Op::Nop
                        }
                    },
                    CircuitState::HalfOpen {
                        started_at,
                        success_count,
                        probe_in_flight,
                    } => {
                        if !probe_in_flight {
                            Op::Put(CircuitState::HalfOpen {
                                started_at: Instant::now(),
                                success_count,
                                probe_in_flight: true,
                            })
                        } else if started_at.elapsed() >= probe_timeout {
                            // Stuck probe; let a fresh one through.
                            warn!(
                                destination = key,
                                "half-open probe timed out, allowing new probe"
                            );
                            Op::Put(CircuitState::HalfOpen {
                                started_at: Instant::now(),
                                success_count,
                                probe_in_flight: true,
                            })
                        } else {
                            rejection = Some(CircuitOpenError::ProbeInFlight {
                                key: key.to_string(),
                            });
                            Op::Nop
                        }
                    },
                },
            });

        match rejection {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Record a successful call against the destination.
    ///
    /// Closed resets the failure streak; `HalfOpen` counts the probe success
    /// and closes the circuit once `success_threshold` consecutive successes
    /// are observed.
    pub fn record_success(&self, key: &str) {
        let success_threshold = self.config.success_threshold;
        let cache_key: Arc<str> = Arc::from(key);
        self.states
            .entry_by_ref(&cache_key)
            .and_compute_with(|entry| match entry {
                None => Op::Nop,
                Some(entry) => match entry.into_value() {
                    CircuitState::Closed { failure_count: 0 } => Op::Nop,
                    CircuitState::Closed { .. } => {
                        Op::Put(CircuitState::Closed { failure_count: 0 })
                    },
                    CircuitState::HalfOpen {
                        started_at,
                        success_count,
                        ..
                    } => {
                        let successes = success_count.saturating_add(1);
                        if successes >= success_threshold {
                            info!(
                                destination = key,
                                successes, "circuit closing after successful recovery"
                            );
                            Op::Put(CircuitState::Closed { failure_count: 0 })
                        } else {
                            Op::Put(CircuitState::HalfOpen {
                                started_at,
                                success_count: successes,
                                probe_in_flight: false,
                            })
                        }
                    },
                    CircuitState::Open { .. } => {
                        warn!(destination = key, "success recorded while circuit open");
                        Op::Nop
                    },
                },
            });
    }

    /// Record a failed call against the destination.
    ///
    /// Closed increments the streak and opens at the threshold; any
    /// `HalfOpen` failure reopens immediately with a fresh cooldown and a
    /// reset success counter.
    pub fn record_failure(&self, key: &str) {
        let threshold = self.config.failure_threshold;
        let cache_key: Arc<str> = Arc::from(key);
        self.states
            .entry_by_ref(&cache_key)
            .and_compute_with(|entry| match entry {
                None => {
                    if threshold <= 1 {
                        warn!(destination = key, "circuit opening after 1 failure");
                        Op::Put(CircuitState::Open {
                            opened_at: Instant::now(),
                            failure_count: 1,
                        })
                    } else {
                        Op::Put(CircuitState::Closed { failure_count: 1 })
                    }
                },
                Some(entry) => match entry.into_value() {
                    CircuitState::Closed { failure_count } => {
                        let count = failure_count.saturating_add(1);
                        if count >= threshold {
                            warn!(
                                destination = key,
                                failures = count,
                                "circuit opening after consecutive failures"
                            );
                            Op::Put(CircuitState::Open {
                                opened_at: Instant::now(),
                                failure_count: count,
                            })
                        } else {
                            Op::Put(CircuitState::Closed {
                                failure_count: count,
                            })
                        }
                    },
                    CircuitState::HalfOpen { .. } => {
                        warn!(destination = key, "circuit reopening after failed probe");
                        Op::Put(CircuitState::Open {
                            opened_at: Instant::now(),
                            failure_count: 1,
                        })
                    },
                    CircuitState::Open { failure_count, .. } => Op::Put(CircuitState::Open {
                        opened_at: Instant::now(),
                        failure_count: failure_count.saturating_add(1),
                    }),
                },
            });
    }

    /// Current state for a destination.
    pub fn state(&self, key: &str) -> CircuitState {
        self.states.get(key).unwrap_or_default()
    }

    pub fn is_open(&self, key: &str) -> bool {
        matches!(self.states.get(key), Some(CircuitState::Open { .. }))
    }

    /// Manually reset a destination to Closed.
    pub fn reset(&self, key: &str) {
        let cache_key: Arc<str> = Arc::from(key);
        self.states
            .entry_by_ref(&cache_key)
            .and_compute_with(|entry| {
                if entry.is_some() {
                    info!(destination = key, "circuit manually reset");
                    Op::Put(CircuitState::Closed { failure_count: 0 })
                } else {
                    Op::Nop
                }
            });
    }

    /// All tracked destinations with their state names, for the health API.
    pub fn all_states(&self) -> Vec<(String, &'static str)> {
        self.states.run_pending_tasks();
        self.states
            .iter()
            .map(|(k, v)| (k.deref().to_string(), v.name()))
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
