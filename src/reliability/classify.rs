//! Error classification taxonomy.
//!
//! Maps a raw [`ProviderError`] into a normalized [`ClassifiedError`]
//! carrying a taxonomy kind, severity, and retry policy hint. Severity and
//! retryability are table-driven off the kind, never inferred from message
//! text, so classification stays deterministic.

use std::collections::BTreeMap;
use std::io::ErrorKind as IoKind;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::constants;
use crate::provider::ProviderError;

/// Taxonomy of provider failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Authentication
    AuthExpired,
    AuthFailed,
    InsufficientPermissions,
    // Rate limiting
    RateLimitExceeded,
    ThroughputLimitExceeded,
    // Request validation
    InvalidRecipient,
    InvalidFormat,
    TemplateNotFound,
    TemplateNotApproved,
    MediaTooLarge,
    UnsupportedMediaType,
    MissingParameter,
    InvalidParameter,
    // Provider-side failures
    ServerError,
    ServiceUnavailable,
    BadGateway,
    GatewayTimeout,
    // Transport failures (no response at all)
    NetworkError,
    TimeoutError,
    ConnectionReset,
    ConnectionRefused,
    HostUnreachable,
    DnsFailure,
    // Synthetic kinds produced by the executor, never by `classify`
    CircuitOpen,
    Cancelled,
    // Fallback
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::InsufficientPermissions => "insufficient_permissions",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::ThroughputLimitExceeded => "throughput_limit_exceeded",
            ErrorKind::InvalidRecipient => "invalid_recipient",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::TemplateNotFound => "template_not_found",
            ErrorKind::TemplateNotApproved => "template_not_approved",
            ErrorKind::MediaTooLarge => "media_too_large",
            ErrorKind::UnsupportedMediaType => "unsupported_media_type",
            ErrorKind::MissingParameter => "missing_parameter",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::GatewayTimeout => "gateway_timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::HostUnreachable => "host_unreachable",
            ErrorKind::DnsFailure => "dns_failure",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UnknownError => "unknown_error",
        }
    }

    /// Severity assigned to this kind.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::AuthExpired | ErrorKind::AuthFailed | ErrorKind::InsufficientPermissions => {
                Severity::Critical
            },
            ErrorKind::ServerError
            | ErrorKind::ServiceUnavailable
            | ErrorKind::BadGateway
            | ErrorKind::GatewayTimeout
            | ErrorKind::NetworkError
            | ErrorKind::TimeoutError
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::HostUnreachable
            | ErrorKind::DnsFailure
            | ErrorKind::CircuitOpen => Severity::High,
            ErrorKind::RateLimitExceeded
            | ErrorKind::ThroughputLimitExceeded
            | ErrorKind::InvalidRecipient
            | ErrorKind::InvalidFormat
            | ErrorKind::TemplateNotFound
            | ErrorKind::TemplateNotApproved
            | ErrorKind::MediaTooLarge
            | ErrorKind::UnsupportedMediaType
            | ErrorKind::MissingParameter
            | ErrorKind::InvalidParameter => Severity::Medium,
            ErrorKind::Cancelled | ErrorKind::UnknownError => Severity::Low,
        }
    }

    /// Whether a call failing with this kind may be retried transparently.
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorKind::RateLimitExceeded
            | ErrorKind::ThroughputLimitExceeded
            | ErrorKind::TemplateNotApproved
            | ErrorKind::ServerError
            | ErrorKind::ServiceUnavailable
            | ErrorKind::BadGateway
            | ErrorKind::GatewayTimeout
            | ErrorKind::NetworkError
            | ErrorKind::TimeoutError
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::HostUnreachable
            | ErrorKind::DnsFailure => true,
            ErrorKind::AuthExpired
            | ErrorKind::AuthFailed
            | ErrorKind::InsufficientPermissions
            | ErrorKind::InvalidRecipient
            | ErrorKind::InvalidFormat
            | ErrorKind::TemplateNotFound
            | ErrorKind::MediaTooLarge
            | ErrorKind::UnsupportedMediaType
            | ErrorKind::MissingParameter
            | ErrorKind::InvalidParameter
            | ErrorKind::CircuitOpen
            | ErrorKind::Cancelled
            | ErrorKind::UnknownError => false,
        }
    }

    /// Delay hint attached at classification time, if the kind carries one.
    pub fn suggested_delay(self) -> Option<Duration> {
        match self {
            ErrorKind::RateLimitExceeded => {
                Some(Duration::from_secs(constants::RATE_LIMIT_DELAY_SECS))
            },
            ErrorKind::ThroughputLimitExceeded => {
                Some(Duration::from_secs(constants::THROUGHPUT_LIMIT_DELAY_SECS))
            },
            ErrorKind::ServiceUnavailable => {
                Some(Duration::from_secs(constants::SERVICE_UNAVAILABLE_DELAY_SECS))
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A normalized failure record, derived once at classification time and
/// immutable afterward.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    /// Correlation id for logs and metrics.
    pub id: Uuid,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    /// Delay the provider asked for (rate limits, 503), when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_delay: Option<Duration>,
    pub raw_status: Option<u16>,
    pub raw_code: Option<i64>,
    /// Opaque key/value context for operators.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    pub message: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.severity(),
            retryable: kind.is_retryable(),
            suggested_delay: kind.suggested_delay(),
            raw_status: None,
            raw_code: None,
            context: BTreeMap::new(),
            message: message.into(),
        }
    }

    /// Synthetic failure for a request rejected by an open circuit.
    ///
    /// Not provider-reported; lets monitoring distinguish "the provider is
    /// failing" from "we are protecting it by not calling".
    pub fn circuit_open(destination: &str, detail: impl std::fmt::Display) -> Self {
        let mut err = Self::new(ErrorKind::CircuitOpen, detail.to_string());
        err.context
            .insert("destination".to_string(), destination.to_string());
        err
    }

    /// Synthetic outcome for a caller-cancelled execution.
    pub fn cancelled(destination: &str) -> Self {
        let mut err = Self::new(
            ErrorKind::Cancelled,
            format!("operation against '{destination}' cancelled by caller"),
        );
        err.context
            .insert("destination".to_string(), destination.to_string());
        err
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Classify a raw provider failure.
///
/// Pure function: no side effects, never panics. Rules apply in priority
/// order; the first matching rule wins.
pub fn classify(raw: &ProviderError) -> ClassifiedError {
    let kind = match raw.status {
        Some(401) if raw.code == Some(constants::CODE_TOKEN_EXPIRED) => ErrorKind::AuthExpired,
        Some(401) => ErrorKind::AuthFailed,
        Some(403) => ErrorKind::InsufficientPermissions,
        Some(429) => {
            if raw.subcode == Some(constants::SUBCODE_THROUGHPUT_LIMIT) {
                ErrorKind::ThroughputLimitExceeded
            } else {
                ErrorKind::RateLimitExceeded
            }
        },
        Some(400) => classify_validation(raw.code),
        Some(503) => ErrorKind::ServiceUnavailable,
        Some(502) => ErrorKind::BadGateway,
        Some(504) => ErrorKind::GatewayTimeout,
        Some(s) if s >= 500 => ErrorKind::ServerError,
        Some(_) => ErrorKind::UnknownError,
        None => match raw.io_kind {
            Some(kind) => classify_transport(kind),
            None => ErrorKind::UnknownError,
        },
    };

    let mut classified = ClassifiedError::new(kind, raw.message.clone());
    classified.raw_status = raw.status;
    classified.raw_code = raw.code;
    if let Some(subcode) = raw.subcode {
        classified
            .context
            .insert("subcode".to_string(), subcode.to_string());
    }
    classified
}

fn classify_validation(code: Option<i64>) -> ErrorKind {
    match code {
        Some(constants::CODE_INVALID_RECIPIENT) => ErrorKind::InvalidRecipient,
        Some(constants::CODE_INVALID_FORMAT) => ErrorKind::InvalidFormat,
        Some(constants::CODE_TEMPLATE_NOT_FOUND) => ErrorKind::TemplateNotFound,
        Some(constants::CODE_TEMPLATE_NOT_APPROVED) => ErrorKind::TemplateNotApproved,
        Some(constants::CODE_MEDIA_TOO_LARGE) => ErrorKind::MediaTooLarge,
        Some(constants::CODE_UNSUPPORTED_MEDIA_TYPE) => ErrorKind::UnsupportedMediaType,
        Some(constants::CODE_MISSING_PARAMETER) => ErrorKind::MissingParameter,
        _ => ErrorKind::InvalidParameter,
    }
}

fn classify_transport(kind: IoKind) -> ErrorKind {
    match kind {
        IoKind::ConnectionReset | IoKind::ConnectionAborted | IoKind::BrokenPipe => {
            ErrorKind::ConnectionReset
        },
        IoKind::ConnectionRefused => ErrorKind::ConnectionRefused,
        IoKind::TimedOut => ErrorKind::TimeoutError,
        IoKind::HostUnreachable | IoKind::NetworkUnreachable => ErrorKind::HostUnreachable,
        IoKind::NotFound => ErrorKind::DnsFailure,
        _ => ErrorKind::NetworkError,
    }
}
