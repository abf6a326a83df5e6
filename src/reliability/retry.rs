//! Retry executor with exponential backoff and circuit gating.
//!
//! Wraps a single provider call: the destination's circuit is checked
//! before any attempt, failures are classified to decide retryability, and
//! backoff sleeps suspend only the calling task. Callers may cancel a
//! running execution between attempts through a [`CancelToken`]; a
//! cancelled outcome never counts toward circuit statistics.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::classify::{ClassifiedError, classify};
use crate::constants;
use crate::provider::ProviderError;

/// Retry behavior configuration, immutable per executor instance.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per execution (first attempt + retries).
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the exponential backoff.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Fraction of the computed delay added as random jitter.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(constants::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(constants::RETRY_MAX_DELAY_MS),
            backoff_multiplier: constants::RETRY_BACKOFF_MULTIPLIER,
            jitter_fraction: constants::RETRY_JITTER_FRACTION,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_fraction = 0.0;
        self
    }
}

/// Cancellation source handed to the code that decides to abort.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal cancellation to every token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation signal observed by the retry loop.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled. Pends forever if the source
    /// was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Executes provider operations with bounded retries behind a circuit gate.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self { policy, breaker }
    }

    /// Shared handle to the underlying circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute `operation` against `destination` with retries.
    ///
    /// `operation` performs one attempt per invocation. Non-retryable
    /// failures and exhausted retries propagate as a [`ClassifiedError`]
    /// after recording one circuit-breaker failure; an open circuit fails
    /// fast with a synthetic `CircuitOpen` error before any attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        destination: &str,
        operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.run(destination, operation, None).await
    }

    /// Like [`execute`](Self::execute), aborting between attempts when the
    /// token is cancelled. Cancellation does not touch circuit statistics.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        destination: &str,
        operation: F,
        cancel: &CancelToken,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.run(destination, operation, Some(cancel.clone())).await
    }

    async fn run<T, F, Fut>(
        &self,
        destination: &str,
        mut operation: F,
        mut cancel: Option<CancelToken>,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if let Err(gate) = self.breaker.check_request(destination) {
            debug!(destination, error = %gate, "request rejected by circuit");
            return Err(ClassifiedError::circuit_open(destination, gate));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if let Some(token) = cancel.as_ref()
                && token.is_cancelled()
            {
                return Err(ClassifiedError::cancelled(destination));
            }

            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(destination, attempts = attempt, "succeeded after retries");
                    }
                    self.breaker.record_success(destination);
                    return Ok(value);
                },
                Err(raw) => {
                    let classified = classify(&raw);
                    if !classified.retryable || attempt >= max_attempts {
                        warn!(
                            destination,
                            attempts = attempt,
                            kind = %classified.kind,
                            error_id = %classified.id,
                            retryable = classified.retryable,
                            "giving up",
                        );
                        self.breaker.record_failure(destination);
                        return Err(classified);
                    }

                    let delay = self.retry_delay(&classified, attempt);
                    warn!(
                        destination,
                        attempt,
                        max_attempts,
                        next_delay_ms = delay.as_millis() as u64,
                        kind = %classified.kind,
                        "attempt failed, will retry",
                    );
                    match cancel.as_mut() {
                        Some(token) => {
                            tokio::select! {
                                () = sleep(delay) => {},
                                () = token.cancelled() => {
                                    return Err(ClassifiedError::cancelled(destination));
                                },
                            }
                        },
                        None => sleep(delay).await,
                    }
                },
            }
        }
    }

    /// Delay before the retry following failed attempt number `attempt`.
    ///
    /// A classification-time delay hint wins over the exponential schedule;
    /// jitter is added on top of either.
    fn retry_delay(&self, classified: &ClassifiedError, attempt: u32) -> Duration {
        let base = classified
            .suggested_delay
            .unwrap_or_else(|| self.backoff_delay(attempt));
        base + self.jitter(base)
    }

    /// Exponential backoff: `min(max_delay, base * multiplier^(attempt-1))`.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let raw = self.policy.base_delay.as_secs_f64()
            * self.policy.backoff_multiplier.powi(exponent as i32);
        Duration::from_secs_f64(raw.min(self.policy.max_delay.as_secs_f64()))
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.policy.jitter_fraction <= 0.0 {
            return Duration::ZERO;
        }
        let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
        Duration::from_secs_f64(delay.as_secs_f64() * self.policy.jitter_fraction * unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::reliability::classify::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(policy: RetryPolicy) -> RetryExecutor {
        RetryExecutor::new(policy, CircuitBreaker::default())
    }

    fn executor_with_breaker(policy: RetryPolicy, config: CircuitBreakerConfig) -> RetryExecutor {
        RetryExecutor::new(policy, CircuitBreaker::new(config))
    }

    // =========================================================================
    // BACKOFF SCHEDULE
    // =========================================================================

    #[test]
    fn test_backoff_sequence_is_capped() {
        let ex = executor(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.0,
        });

        let delays: Vec<u64> = (1..=5)
            .map(|a| ex.backoff_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000]);
    }

    #[test]
    fn test_suggested_delay_wins_over_backoff() {
        let ex = executor(RetryPolicy::default().without_jitter());
        let classified = classify(&ProviderError::http(429, "slow down"));
        assert_eq!(ex.retry_delay(&classified, 1), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_is_bounded_by_fraction() {
        let ex = executor(RetryPolicy {
            jitter_fraction: 0.5,
            ..Default::default()
        });
        for _ in 0..100 {
            let jitter = ex.jitter(Duration::from_millis(1000));
            assert!(jitter < Duration::from_millis(500));
        }
    }

    // =========================================================================
    // RETRY LOOP
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try() {
        let ex = executor(RetryPolicy::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = ex
            .execute("new", || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProviderError>(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failure_until_success() {
        let ex = executor(RetryPolicy::default().with_max_attempts(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = ex
            .execute("new", || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::http(500, "flaky"))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let ex = executor(RetryPolicy::default().with_max_attempts(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let err = ex
            .execute("new", || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(ProviderError::http_with_code(401, 190, "token expired"))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthExpired);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_last_error() {
        let ex = executor(RetryPolicy::default().with_max_attempts(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let err = ex
            .execute("new", || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(ProviderError::http(503, "still down"))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    // =========================================================================
    // CIRCUIT INTERACTION
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_only_terminal_failures_count_toward_circuit() {
        let ex = executor_with_breaker(
            RetryPolicy::default().with_max_attempts(3),
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(300),
                ..Default::default()
            },
        );
        let _ = ex
            .execute("new", || async {
                Err::<u32, _>(ProviderError::http(500, "down"))
            })
            .await;
        // Three attempts, one terminal failure recorded.
        assert_eq!(
            ex.breaker().state("new"),
            CircuitState::Closed { failure_count: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_calling_operation() {
        let ex = executor_with_breaker(
            RetryPolicy::default().with_max_attempts(1),
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(300),
                ..Default::default()
            },
        );
        for _ in 0..2 {
            let _ = ex
                .execute("new", || async {
                    Err::<u32, _>(ProviderError::http(500, "down"))
                })
                .await;
        }
        assert!(ex.breaker().is_open("new"));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let err = ex
            .execute("new", || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProviderError>(1)
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_retry_uses_suggested_delay() {
        // Paused clock: the 60s suggested delay auto-advances.
        let ex = executor(RetryPolicy::default().with_max_attempts(2).without_jitter());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let started = tokio::time::Instant::now();
        let result = ex
            .execute("new", || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::http(429, "throttled"))
                    } else {
                        Ok(1u32)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    // =========================================================================
    // CANCELLATION
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_cancelled() {
        let ex = executor(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_base_delay(Duration::from_secs(10))
                .without_jitter(),
        );
        let source = CancelSource::new();
        let token = source.token();

        let handle = tokio::spawn({
            let ex = ex.clone();
            async move {
                ex.execute_with_cancel(
                    "new",
                    || async { Err::<u32, _>(ProviderError::http(500, "down")) },
                    &token,
                )
                .await
            }
        });
        // Let the first attempt fail and the backoff sleep begin.
        tokio::time::sleep(Duration::from_secs(1)).await;
        source.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        // A cancelled run records no circuit failure.
        assert_eq!(
            ex.breaker().state("new"),
            CircuitState::Closed { failure_count: 0 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_skips_all_attempts() {
        let ex = executor(RetryPolicy::default());
        let source = CancelSource::new();
        let token = source.token();
        source.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let err = ex
            .execute_with_cancel(
                "new",
                || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ProviderError>(1)
                    }
                },
                &token,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
