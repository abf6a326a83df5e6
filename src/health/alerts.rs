//! Health alerts and the notification seam.
//!
//! Alerts are created during threshold evaluation and handed to a
//! [`NotificationSink`]; delivery (webhook, email, pager) lives outside
//! this crate. The provided sink writes structured log lines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

/// What a threshold evaluation found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighErrorRate,
    ErrorRateRegression,
    LowSustainedSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// One triggered alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub measured_value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn critical(
        alert_type: AlertType,
        message: impl Into<String>,
        measured_value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            alert_type,
            severity: AlertSeverity::Critical,
            message: message.into(),
            measured_value,
            threshold,
            timestamp: Utc::now(),
        }
    }

    pub fn warning(
        alert_type: AlertType,
        message: impl Into<String>,
        measured_value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            alert_type,
            severity: AlertSeverity::Warning,
            message: message.into(),
            measured_value,
            threshold,
            timestamp: Utc::now(),
        }
    }
}

/// Delivery seam for alerts.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, alert: &Alert);
}

/// Notification sink that writes alerts to the structured log.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Critical => error!(
                alert_type = ?alert.alert_type,
                measured = alert.measured_value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                alert_type = ?alert.alert_type,
                measured = alert.measured_value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
        }
    }
}
