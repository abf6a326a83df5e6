//! Crate-wide default values.
//!
//! Tunables live here so that `Config` defaults, component `Default` impls,
//! and tests all agree on a single source of truth.

/// Default HTTP port for the operator API.
pub const DEFAULT_PORT: u16 = 7311;

/// Total attempts per execution (first attempt + retries).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay before the first retry.
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Cap applied to the exponential backoff.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Multiplier applied to the delay after each failed attempt.
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Fraction of the computed delay added as random jitter.
pub const RETRY_JITTER_FRACTION: f64 = 0.1;

/// Consecutive failures before a destination's circuit opens.
pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Cooldown before an open circuit allows a recovery probe.
pub const CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 60;

/// Consecutive half-open successes required to close the circuit.
pub const CIRCUIT_BREAKER_SUCCESS_THRESHOLD: u32 = 2;

/// Interval between health monitor ticks.
pub const HEALTH_INTERVAL_SECS: u64 = 60;

/// Error-rate percentage above which a Critical alert fires.
pub const HEALTH_ROLLBACK_THRESHOLD_PCT: f64 = 5.0;

/// Margin (in percentage points) the new provider's error rate may exceed
/// the legacy baseline before a regression Warning fires.
pub const HEALTH_REGRESSION_MARGIN_PCT: f64 = 5.0;

/// Floor for the rolling new-provider success rate.
pub const HEALTH_SUSTAINED_SUCCESS_FLOOR_PCT: f64 = 95.0;

/// Number of recent snapshots in the rolling success-rate window.
pub const HEALTH_ROLLING_WINDOW: usize = 5;

/// Maximum retained health snapshots.
pub const HEALTH_HISTORY_LIMIT: usize = 100;

/// Suggested delay after a plain rate-limit response.
pub const RATE_LIMIT_DELAY_SECS: u64 = 60;

/// Suggested delay after an account-throughput rate limit.
pub const THROUGHPUT_LIMIT_DELAY_SECS: u64 = 3600;

/// Suggested delay after a 503 response.
pub const SERVICE_UNAVAILABLE_DELAY_SECS: u64 = 30;

/// Provider error code signalling an expired access token on a 401.
pub const CODE_TOKEN_EXPIRED: i64 = 190;

/// Provider validation codes carried on 400 responses.
pub const CODE_INVALID_RECIPIENT: i64 = 1;
pub const CODE_INVALID_FORMAT: i64 = 2;
pub const CODE_TEMPLATE_NOT_FOUND: i64 = 3;
pub const CODE_TEMPLATE_NOT_APPROVED: i64 = 4;
pub const CODE_MEDIA_TOO_LARGE: i64 = 5;
pub const CODE_UNSUPPORTED_MEDIA_TYPE: i64 = 6;
pub const CODE_MISSING_PARAMETER: i64 = 7;

/// Sub-code on a 429 signalling the account-level throughput limit.
pub const SUBCODE_THROUGHPUT_LIMIT: i64 = 4;

/// Buffered audit records per subscriber before lagging.
pub const AUDIT_CHANNEL_CAPACITY: usize = 256;
