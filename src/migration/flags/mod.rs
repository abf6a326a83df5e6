//! Persistent migration flags.
//!
//! The migration state machine derives everything from three stored fields;
//! [`FlagStore`] is the pluggable persistence seam. The redb backend
//! survives process restarts, the memory backend serves tests and
//! ephemeral deployments.

mod memory;
mod redb_store;

pub use memory::MemoryFlagStore;
pub use redb_store::RedbFlagStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The three persisted fields the whole migration lifecycle derives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigrationFlags {
    /// Whether a migration is in flight.
    pub migration_mode: bool,
    /// Whether the new provider is authoritative for all traffic.
    pub new_provider: bool,
    /// Share of traffic routed to the new provider while migrating.
    pub traffic_percentage: u8,
}

/// Backend trait for flag persistence.
///
/// All backends must be thread-safe (`Send + Sync`). Each setter persists a
/// single field; the state machine composes setters into transitions and
/// compensates when a multi-field transition partially fails.
#[async_trait]
pub trait FlagStore: Send + Sync + 'static {
    /// Reads all three fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn load(&self) -> Result<MigrationFlags>;

    /// Persists the migration-mode flag.
    async fn set_migration_mode(&self, enabled: bool) -> Result<()>;

    /// Persists the new-provider flag.
    async fn set_new_provider(&self, enabled: bool) -> Result<()>;

    /// Persists the traffic percentage.
    async fn set_traffic_percentage(&self, percentage: u8) -> Result<()>;
}
