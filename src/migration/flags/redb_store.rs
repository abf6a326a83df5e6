//! redb-backed flag store.
//!
//! Flags are stored as a single JSON value so the on-disk shape can evolve
//! without a schema migration. Read-modify-write happens inside one write
//! transaction; redb's single-writer model makes each setter atomic.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{FlagStore, MigrationFlags};

const FLAGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("migration_flags");
const FLAGS_KEY: &str = "flags";

/// Durable flag store; survives process restarts.
#[derive(Clone)]
pub struct RedbFlagStore {
    db: Arc<Database>,
}

impl RedbFlagStore {
    /// Opens (or creates) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let db = Database::create(path)
            .with_context(|| format!("Failed to open flag store at {}", path.display()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn read_flags(&self) -> Result<MigrationFlags> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;

        let table = match read_txn.open_table(FLAGS_TABLE) {
            Ok(table) => table,
            // Table is created lazily by the first write.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(MigrationFlags::default()),
            Err(e) => return Err(e).context("Failed to open flags table"),
        };

        match table.get(FLAGS_KEY).context("Failed to read flags")? {
            Some(guard) => serde_json::from_slice(guard.value())
                .context("Failed to deserialize stored flags"),
            None => Ok(MigrationFlags::default()),
        }
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut MigrationFlags),
    {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        {
            let mut table = write_txn
                .open_table(FLAGS_TABLE)
                .context("Failed to open flags table")?;

            let mut flags = {
                let existing = table.get(FLAGS_KEY).context("Failed to read flags")?;
                match existing {
                    Some(guard) => serde_json::from_slice(guard.value())
                        .context("Failed to deserialize stored flags")?,
                    None => MigrationFlags::default(),
                }
            };
            apply(&mut flags);

            let json = serde_json::to_vec(&flags).context("Failed to serialize flags")?;
            table
                .insert(FLAGS_KEY, json.as_slice())
                .context("Failed to write flags")?;
        }

        write_txn
            .commit()
            .context("Failed to commit flag update transaction")?;
        Ok(())
    }
}

#[async_trait]
impl FlagStore for RedbFlagStore {
    async fn load(&self) -> Result<MigrationFlags> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.read_flags())
            .await
            .context("Task join error")?
    }

    async fn set_migration_mode(&self, enabled: bool) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update(|flags| flags.migration_mode = enabled))
            .await
            .context("Task join error")?
    }

    async fn set_new_provider(&self, enabled: bool) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update(|flags| flags.new_provider = enabled))
            .await
            .context("Task join error")?
    }

    async fn set_traffic_percentage(&self, percentage: u8) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.update(|flags| flags.traffic_percentage = percentage)
        })
        .await
        .context("Task join error")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_store_reads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbFlagStore::open(dir.path().join("flags.redb")).unwrap();
        assert_eq!(store.load().await.unwrap(), MigrationFlags::default());
    }

    #[tokio::test]
    async fn test_setters_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbFlagStore::open(dir.path().join("flags.redb")).unwrap();

        store.set_migration_mode(true).await.unwrap();
        store.set_traffic_percentage(40).await.unwrap();

        let flags = store.load().await.unwrap();
        assert!(flags.migration_mode);
        assert!(!flags.new_provider);
        assert_eq!(flags.traffic_percentage, 40);
    }

    #[tokio::test]
    async fn test_flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.redb");

        {
            let store = RedbFlagStore::open(&path).unwrap();
            store.set_migration_mode(true).await.unwrap();
            store.set_traffic_percentage(75).await.unwrap();
        }

        let reopened = RedbFlagStore::open(&path).unwrap();
        let flags = reopened.load().await.unwrap();
        assert!(flags.migration_mode);
        assert_eq!(flags.traffic_percentage, 75);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("flags.redb");
        let store = RedbFlagStore::open(&nested).unwrap();
        store.set_new_provider(true).await.unwrap();
        assert!(store.load().await.unwrap().new_provider);
    }
}
