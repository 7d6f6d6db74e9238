//! Store selection at startup

use crate::{MemoryStorage, Prefix, Result, SqliteStorage, Storage, WriteOptions};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Either a volatile or a durable prefix store
#[derive(Clone)]
pub enum FlexibleStorage {
    /// SQLite database file
    Sqlite(SqliteStorage),
    /// In-memory storage
    Memory(MemoryStorage),
}

impl FlexibleStorage {
    /// Open the SQLite store, or a memory store when `use_memory` is set
    ///
    /// A database that fails to open is an error; there is no silent fall
    /// back to memory, which would lose allocations on restart.
    pub async fn open(datastore: impl AsRef<Path>, use_memory: bool) -> Result<Self> {
        if use_memory {
            info!("Using in-memory prefix store");
            return Ok(Self::Memory(MemoryStorage::new()));
        }
        Ok(Self::Sqlite(SqliteStorage::connect(datastore).await?))
    }

    /// Check if allocations survive a restart
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Sqlite(_))
    }

    /// Get the SQLite store, if that is the backend
    pub fn as_sqlite(&self) -> Option<&SqliteStorage> {
        match self {
            Self::Sqlite(store) => Some(store),
            Self::Memory(_) => None,
        }
    }
}

#[async_trait]
impl Storage for FlexibleStorage {
    async fn add(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        match self {
            Self::Sqlite(store) => store.add(prefix, opts).await,
            Self::Memory(store) => store.add(prefix, opts).await,
        }
    }

    async fn update(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        match self {
            Self::Sqlite(store) => store.update(prefix, opts).await,
            Self::Memory(store) => store.update(prefix, opts).await,
        }
    }

    async fn delete(&self, prefix: &Prefix) -> Result<()> {
        match self {
            Self::Sqlite(store) => store.delete(prefix).await,
            Self::Memory(store) => store.delete(prefix).await,
        }
    }

    async fn get(&self, name: &str, parent: Option<&Prefix>) -> Result<Option<Prefix>> {
        match self {
            Self::Sqlite(store) => store.get(name, parent).await,
            Self::Memory(store) => store.get(name, parent).await,
        }
    }

    async fn get_children(&self, parent: &Prefix) -> Result<Vec<Prefix>> {
        match self {
            Self::Sqlite(store) => store.get_children(parent).await,
            Self::Memory(store) => store.get_children(parent).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.db");

        let memory = FlexibleStorage::open(&path, true).await.unwrap();
        assert!(!memory.is_persistent());
        assert!(!path.exists());

        let sqlite = FlexibleStorage::open(&path, false).await.unwrap();
        assert!(sqlite.is_persistent());
        assert!(sqlite.as_sqlite().is_some());
        assert!(path.exists());
    }
}
