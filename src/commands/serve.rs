//! Run the operator API daemon.
//!
//! Wires the durable flag store, migration state machine, metrics sink,
//! circuit breaker, and health monitor together, then serves the HTTP
//! operator surface until interrupted.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::daemon::http::{self, AppState};
use crate::health::{AtomicMetrics, HealthMonitor, LogNotificationSink, MetricsSink};
use crate::migration::{AuditLog, MigrationStateMachine, RedbFlagStore};
use crate::reliability::CircuitBreaker;

/// Serve the operator API.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, the flag store
/// cannot be opened, or the listener cannot bind.
pub async fn execute(config_path: Option<&Path>, port_override: Option<u16>) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };
    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let port = port_override.unwrap_or(config.server.port);
    let store_path = config.store_path()?;
    info!(path = %store_path.display(), "opening flag store");
    let store = RedbFlagStore::open(&store_path)?;

    let state_machine = Arc::new(MigrationStateMachine::new(
        Arc::new(store),
        AuditLog::new(),
    ));
    let metrics = Arc::new(AtomicMetrics::new());
    let breaker = CircuitBreaker::new(config.breaker_config());
    let monitor = Arc::new(HealthMonitor::new(
        config.health_config(),
        metrics as Arc<dyn MetricsSink>,
        state_machine.clone(),
        breaker,
        Arc::new(LogNotificationSink),
    ));

    let monitor_task = tokio::spawn(monitor.clone().run());

    let app = http::router(Arc::new(AppState {
        state_machine,
        monitor,
    }));
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "operator API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Operator API server failed")?;

    monitor_task.abort();
    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install Ctrl-C handler; running until killed");
        std::future::pending::<()>().await;
    }
}
