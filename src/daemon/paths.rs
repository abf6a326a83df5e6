//! Path utilities for relay infrastructure.
//!
//! Centralized path resolution for relay-related files:
//!
//! - [`get_relay_dir`] - `~/.relay/` (base directory for all relay data)
//! - [`get_flags_path`] - `~/.relay/flags.redb` (migration flag database)

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the relay base directory.
///
/// Resolution order:
/// 1. `RELAY_HOME` environment variable (if set)
/// 2. `~/.relay/` (default)
///
/// CI/CD systems can override the location by setting `RELAY_HOME`.
pub fn get_relay_dir() -> Result<PathBuf> {
    if let Ok(relay_home) = std::env::var("RELAY_HOME")
        && !relay_home.is_empty()
    {
        return Ok(PathBuf::from(relay_home));
    }

    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".relay"))
}

/// Get the migration flag database path: `~/.relay/flags.redb`
pub fn get_flags_path() -> Result<PathBuf> {
    Ok(get_relay_dir()?.join("flags.redb"))
}
