//! Configuration types for the relay controller.
//!
//! Settings load from `relay.toml` and cover the operator API server, the
//! durable flag store, provider selection, retry/circuit-breaker behavior,
//! and the health monitor. Every field has a default suitable for local
//! use, and [`Config::validate`] separates hard errors from non-fatal
//! warnings the caller may log.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::dispatch::ProviderStrategy;
use crate::health::HealthConfig;
use crate::reliability::{CircuitBreakerConfig, RetryPolicy};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// relay.toml configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Operator API server settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    constants::DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Durable flag store settings.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Database path; defaults to `~/.relay/flags.redb`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Provider selection.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// `auto` (hash routing against the live percentage), `legacy`, or `new`.
    #[serde(default)]
    pub strategy: ProviderStrategy,
}

/// Retry executor settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

fn default_max_attempts() -> u32 {
    constants::RETRY_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    constants::RETRY_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    constants::RETRY_MAX_DELAY_MS
}

fn default_backoff_multiplier() -> f64 {
    constants::RETRY_BACKOFF_MULTIPLIER
}

fn default_jitter_fraction() -> f64 {
    constants::RETRY_JITTER_FRACTION
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    constants::CIRCUIT_BREAKER_FAILURE_THRESHOLD
}

fn default_recovery_timeout_secs() -> u64 {
    constants::CIRCUIT_BREAKER_RECOVERY_SECS
}

fn default_success_threshold() -> u32 {
    constants::CIRCUIT_BREAKER_SUCCESS_THRESHOLD
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_rollback_threshold_pct")]
    pub rollback_threshold_pct: f64,
    #[serde(default = "default_regression_margin_pct")]
    pub regression_margin_pct: f64,
    #[serde(default = "default_sustained_success_floor_pct")]
    pub sustained_success_floor_pct: f64,
    /// Invoke rollback automatically on Critical alerts.
    #[serde(default)]
    pub auto_rollback: bool,
}

fn default_health_interval_secs() -> u64 {
    constants::HEALTH_INTERVAL_SECS
}

fn default_rollback_threshold_pct() -> f64 {
    constants::HEALTH_ROLLBACK_THRESHOLD_PCT
}

fn default_regression_margin_pct() -> f64 {
    constants::HEALTH_REGRESSION_MARGIN_PCT
}

fn default_sustained_success_floor_pct() -> f64 {
    constants::HEALTH_SUSTAINED_SUCCESS_FLOOR_PCT
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            rollback_threshold_pct: default_rollback_threshold_pct(),
            regression_margin_pct: default_regression_margin_pct(),
            sustained_success_floor_pct: default_sustained_success_floor_pct(),
            auto_rollback: false,
        }
    }
}

impl Config {
    /// Load configuration from relay.toml in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if relay.toml cannot be read or contains invalid TOML.
    pub fn load() -> Result<Self> {
        Self::load_from("relay.toml")
    }

    /// Load configuration from relay.toml, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed.
    pub fn load_or_default() -> Result<Self> {
        if Path::new("relay.toml").exists() {
            Self::load()
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields have invalid types or unknown names
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails with one or more errors:
    /// - Zero port, zero attempts, or zero breaker thresholds
    /// - Backoff multiplier below 1 or jitter outside `[0, 1]`
    /// - Delay cap below the base delay
    /// - Health thresholds outside `[0, 100]`
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Server
        if self.server.port == 0 {
            errors.push("server.port cannot be 0. Use a valid port number (1-65535)".to_string());
        }
        if self.server.port < 1024 && self.server.port > 0 {
            warnings.push(format!(
                "server.port {} is a system/privileged port (< 1024)\n  \
                 Recommendation: Use ports >= 1024 to avoid permission issues",
                self.server.port
            ));
        }

        // 2. Retry policy
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts cannot be 0. The first attempt counts".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            errors.push(format!(
                "retry.backoff_multiplier must be >= 1.0 (got {})",
                self.retry.backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            errors.push(format!(
                "retry.jitter_fraction must be between 0.0 and 1.0 (got {})",
                self.retry.jitter_fraction
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            ));
        }
        if self.retry.max_attempts > 10 {
            warnings.push(format!(
                "retry.max_attempts {} is very high (> 10)\n  \
                 Recommendation: Rely on the circuit breaker rather than long retry chains",
                self.retry.max_attempts
            ));
        }

        // 3. Circuit breaker
        if self.circuit_breaker.failure_threshold == 0 {
            errors.push("circuit_breaker.failure_threshold cannot be 0".to_string());
        }
        if self.circuit_breaker.success_threshold == 0 {
            errors.push("circuit_breaker.success_threshold cannot be 0".to_string());
        }
        if self.circuit_breaker.recovery_timeout_secs == 0 {
            errors.push("circuit_breaker.recovery_timeout_secs cannot be 0".to_string());
        }

        // 4. Health monitor
        for (name, value) in [
            (
                "health.rollback_threshold_pct",
                self.health.rollback_threshold_pct,
            ),
            (
                "health.regression_margin_pct",
                self.health.regression_margin_pct,
            ),
            (
                "health.sustained_success_floor_pct",
                self.health.sustained_success_floor_pct,
            ),
        ] {
            if !(0.0..=100.0).contains(&value) {
                errors.push(format!("{name} must be between 0 and 100 (got {value})"));
            }
        }
        if self.health.interval_secs < 5 {
            warnings.push(format!(
                "health.interval_secs {} is very low (< 5)\n  \
                 Recommendation: Use intervals of at least 5 seconds to keep windows meaningful",
                self.health.interval_secs
            ));
        }
        if self.health.auto_rollback && self.health.rollback_threshold_pct > 50.0 {
            warnings.push(format!(
                "health.rollback_threshold_pct {} is very high for auto_rollback\n  \
                 Recommendation: Thresholds above 50% let severe degradation run unrolled-back",
                self.health.rollback_threshold_pct
            ));
        }

        // Return errors if any
        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        // Return warnings (caller decides how to handle/display them)
        Ok(ValidationResult { warnings })
    }

    /// Flag store path, resolving the default under the relay home dir.
    ///
    /// # Errors
    ///
    /// Returns an error when no path is configured and the home directory
    /// cannot be resolved.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => crate::daemon::paths::get_flags_path(),
        }
    }

    /// Retry policy derived from the `[retry]` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            jitter_fraction: self.retry.jitter_fraction,
        }
    }

    /// Circuit breaker configuration derived from `[circuit_breaker]`.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            recovery_timeout: Duration::from_secs(self.circuit_breaker.recovery_timeout_secs),
            success_threshold: self.circuit_breaker.success_threshold,
            ..Default::default()
        }
    }

    /// Health monitor configuration derived from `[health]`.
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            interval: Duration::from_secs(self.health.interval_secs),
            rollback_threshold_pct: self.health.rollback_threshold_pct,
            regression_margin_pct: self.health.regression_margin_pct,
            sustained_success_floor_pct: self.health.sustained_success_floor_pct,
            auto_rollback: self.health.auto_rollback,
            ..Default::default()
        }
    }
}
