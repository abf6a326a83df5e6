//! Provider health: metrics counters, threshold alerts, rollback monitor.

pub mod alerts;
pub mod metrics;
pub mod monitor;

pub use alerts::{Alert, AlertSeverity, AlertType, LogNotificationSink, NotificationSink};
pub use metrics::{AtomicMetrics, DestinationCounters, MetricsSink};
pub use monitor::{DestinationWindow, HealthConfig, HealthMonitor, HealthSnapshot};
