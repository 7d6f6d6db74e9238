//! # IPAM Store
//!
//! Prefix storage layer for the trench IPAM.
//!
//! This crate provides:
//! - **Prefix model**: Named CIDR blocks forming a tree (trench → conduit → node → child)
//! - **Storage trait**: Add, update, delete, get and list children of prefixes
//! - **Volatile store**: Mutex-protected list for single-process use
//! - **SQLite store**: Durable store with a `(parent_id, cidr)` uniqueness backstop
//! - **Garbage collection**: Periodic sweep of stale expirable prefixes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Allocation / Domain            │
//! ├─────────────────────────────────────────┤
//! │     LoggedStorage → Storage Trait       │
//! ├────────────────────┬────────────────────┤
//! │   MemoryStorage    │   SqliteStorage    │
//! │                    │  + GarbageCollector│
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use ipam_store::{Prefix, SqliteStorage, Storage, WriteOptions};
//!
//! let store = SqliteStorage::connect("/run/ipam/data/registry.db").await?;
//! let trench = Prefix::root("default-0", "169.255.0.0/16");
//! store.add(&trench, &WriteOptions::default()).await?;
//! let children = store.get_children(&trench).await?;
//! ```

pub mod error;
pub mod flexible;
pub mod gc;
pub mod logged;
pub mod memory;
pub mod prefix;
pub mod sqlite;
pub mod task;

pub use error::{Result, StoreError};
pub use flexible::FlexibleStorage;
pub use gc::{GarbageCollector, GcConfig};
pub use logged::LoggedStorage;
pub use memory::MemoryStorage;
pub use prefix::Prefix;
pub use sqlite::{PrefixRecord, SqliteStorage};
pub use task::TaskHandle;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Name of the node-internal bridge prefix; never expirable
pub const BRIDGE_PREFIX_NAME: &str = "bridge";

/// Per-call write options
///
/// `expirable` marks the written prefix as eligible for garbage collection.
/// `damping` makes an update a no-op when the stored row was refreshed more
/// recently than the given duration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Mark the prefix expirable
    pub expirable: bool,
    /// Skip refresh writes younger than this
    pub damping: Option<Duration>,
}

impl WriteOptions {
    /// Options for an expirable write
    pub fn expirable() -> Self {
        Self {
            expirable: true,
            damping: None,
        }
    }

    /// Set the update damping threshold
    pub fn with_damping(mut self, damping: Duration) -> Self {
        self.damping = Some(damping);
        self
    }

    /// Set the expirable flag
    pub fn with_expirable(mut self, expirable: bool) -> Self {
        self.expirable = expirable;
        self
    }
}

/// Trait for prefix storage backends
///
/// Writes are immediately visible to subsequent calls on the same store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new prefix
    async fn add(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()>;

    /// Refresh an existing prefix (CIDR, timestamp, expirable flag)
    async fn update(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()>;

    /// Delete a prefix and all of its descendants
    async fn delete(&self, prefix: &Prefix) -> Result<()>;

    /// Look up a prefix by name under `parent`
    async fn get(&self, name: &str, parent: Option<&Prefix>) -> Result<Option<Prefix>>;

    /// List the direct children of `parent`
    async fn get_children(&self, parent: &Prefix) -> Result<Vec<Prefix>>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn add(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        (**self).add(prefix, opts).await
    }

    async fn update(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        (**self).update(prefix, opts).await
    }

    async fn delete(&self, prefix: &Prefix) -> Result<()> {
        (**self).delete(prefix).await
    }

    async fn get(&self, name: &str, parent: Option<&Prefix>) -> Result<Option<Prefix>> {
        (**self).get(name, parent).await
    }

    async fn get_children(&self, parent: &Prefix) -> Result<Vec<Prefix>> {
        (**self).get_children(parent).await
    }
}
