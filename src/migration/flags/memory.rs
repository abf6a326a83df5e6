//! In-memory flag store.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use super::{FlagStore, MigrationFlags};

/// Flag store backed by process memory. Reads are lock-cheap; nothing
/// survives a restart.
#[derive(Clone, Default)]
pub struct MemoryFlagStore {
    flags: Arc<RwLock<MigrationFlags>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known flag combination (tests, seeded deployments).
    pub fn with_flags(flags: MigrationFlags) -> Self {
        Self {
            flags: Arc::new(RwLock::new(flags)),
        }
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn load(&self) -> Result<MigrationFlags> {
        Ok(*self.flags.read())
    }

    async fn set_migration_mode(&self, enabled: bool) -> Result<()> {
        self.flags.write().migration_mode = enabled;
        Ok(())
    }

    async fn set_new_provider(&self, enabled: bool) -> Result<()> {
        self.flags.write().new_provider = enabled;
        Ok(())
    }

    async fn set_traffic_percentage(&self, percentage: u8) -> Result<()> {
        self.flags.write().traffic_percentage = percentage;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_to_all_legacy() {
        let store = MemoryFlagStore::new();
        let flags = store.load().await.unwrap();
        assert_eq!(flags, MigrationFlags::default());
        assert!(!flags.migration_mode);
        assert!(!flags.new_provider);
        assert_eq!(flags.traffic_percentage, 0);
    }

    #[tokio::test]
    async fn test_setters_persist_individually() {
        let store = MemoryFlagStore::new();
        store.set_migration_mode(true).await.unwrap();
        store.set_traffic_percentage(25).await.unwrap();

        let flags = store.load().await.unwrap();
        assert!(flags.migration_mode);
        assert!(!flags.new_provider);
        assert_eq!(flags.traffic_percentage, 25);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryFlagStore::new();
        let clone = store.clone();
        store.set_new_provider(true).await.unwrap();
        assert!(clone.load().await.unwrap().new_provider);
    }
}
