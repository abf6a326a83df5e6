//! Print migration status from the flag store.
//!
//! Reads the durable store directly; works whether or not the daemon is
//! running.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::migration::{AuditLog, MigrationStateMachine, RedbFlagStore};

/// Print the current migration status as JSON.
///
/// # Errors
///
/// Returns an error when the configuration or the flag store cannot be
/// read.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };

    let store = RedbFlagStore::open(config.store_path()?)?;
    let machine = MigrationStateMachine::new(Arc::new(store), AuditLog::new());
    let status = machine.status().await?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
