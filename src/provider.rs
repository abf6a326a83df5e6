//! Provider capability types.
//!
//! Transport to an actual messaging backend is an injected capability: the
//! controller only sees the [`MessageProvider`] trait and the raw
//! [`ProviderError`] shape a failed attempt produces. Concrete transports
//! (HTTP clients, SDK wrappers) live outside this crate; tests inject
//! scripted implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The two interchangeable backend providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Legacy,
    New,
}

impl ProviderKind {
    /// Stable name used as the circuit-breaker and metrics destination key.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Legacy => "legacy",
            ProviderKind::New => "new",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content category of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Template,
    Media,
}

/// A message handed to a provider for delivery.
///
/// Content construction is out of scope; the payload is carried opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub recipient: String,
    pub payload: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(kind: MessageKind, recipient: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            recipient: recipient.into(),
            payload,
        }
    }
}

/// Delivery acknowledgement status reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Accepted,
    Queued,
    Sent,
}

/// Successful outcome of a provider send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-assigned message identifier.
    pub message_id: String,
    pub status: DeliveryStatus,
}

/// Raw failure shape produced by a provider attempt.
///
/// Carries whatever structure the transport could extract: an HTTP-like
/// status, provider error code/sub-code, or an OS-level network error kind.
/// The classifier normalizes this into a `ClassifiedError`; nothing else in
/// the crate inspects these fields.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// HTTP-like status, when the provider answered at all.
    pub status: Option<u16>,
    /// Provider-specific error code.
    pub code: Option<i64>,
    /// Provider-specific error sub-code.
    pub subcode: Option<i64>,
    /// OS-level error kind for transport failures with no response.
    pub io_kind: Option<std::io::ErrorKind>,
    /// Human-readable description from the provider or transport.
    pub message: String,
}

impl ProviderError {
    /// Failure with an HTTP-like status and no provider code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            subcode: None,
            io_kind: None,
            message: message.into(),
        }
    }

    /// Failure with an HTTP-like status and a provider error code.
    pub fn http_with_code(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: Some(code),
            subcode: None,
            io_kind: None,
            message: message.into(),
        }
    }

    pub fn with_subcode(mut self, subcode: i64) -> Self {
        self.subcode = Some(subcode);
        self
    }

    /// Transport-level failure that never produced a response.
    pub fn network(io_kind: std::io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            subcode: None,
            io_kind: Some(io_kind),
            message: message.into(),
        }
    }

    /// Failure with no usable structure at all.
    pub fn opaque(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            subcode: None,
            io_kind: None,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::network(err.kind(), err.to_string())
    }
}

/// A backend capable of delivering outbound messages.
///
/// One concrete instance exists per provider (legacy, new). Implementations
/// must be thread-safe; the dispatcher calls them from many tasks at once.
#[async_trait]
pub trait MessageProvider: Send + Sync + 'static {
    /// Perform one delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] carrying whatever structure the transport
    /// could extract from the failure.
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_names() {
        assert_eq!(ProviderKind::Legacy.as_str(), "legacy");
        assert_eq!(ProviderKind::New.as_str(), "new");
        assert_eq!(format!("{}", ProviderKind::New), "new");
    }

    #[test]
    fn test_provider_error_http_constructor() {
        let err = ProviderError::http(503, "service unavailable");
        assert_eq!(err.status, Some(503));
        assert_eq!(err.code, None);
        assert_eq!(err.io_kind, None);
        assert_eq!(format!("{err}"), "service unavailable");
    }

    #[test]
    fn test_provider_error_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ProviderError::from(io);
        assert_eq!(err.io_kind, Some(std::io::ErrorKind::ConnectionRefused));
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_provider_error_subcode_builder() {
        let err = ProviderError::http_with_code(429, 80004, "throttled").with_subcode(4);
        assert_eq!(err.code, Some(80004));
        assert_eq!(err.subcode, Some(4));
    }

    #[test]
    fn test_outbound_message_roundtrip() {
        let msg = OutboundMessage::new(
            MessageKind::Template,
            "+15550001111",
            serde_json::json!({"template": "welcome"}),
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, MessageKind::Template);
        assert_eq!(back.recipient, "+15550001111");
    }
}
