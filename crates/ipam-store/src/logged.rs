//! Logging decorator for prefix stores
//!
//! Wraps another [`Storage`] and emits a tracing event for every mutation.
//! Reads pass straight through.

use crate::{Prefix, Result, Storage, WriteOptions};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// A store that logs writes before forwarding them
#[derive(Clone)]
pub struct LoggedStorage<S> {
    inner: S,
}

impl<S: Storage> LoggedStorage<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn parent_name(prefix: &Prefix) -> &str {
    prefix.parent().map(|p| p.name()).unwrap_or("")
}

#[async_trait]
impl<S: Storage> Storage for LoggedStorage<S> {
    async fn add(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        let result = self.inner.add(prefix, opts).await;
        match &result {
            Ok(()) => info!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                expirable = opts.expirable,
                "Prefix added"
            ),
            Err(e) if e.is_uniqueness_conflict() => debug!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                "Prefix add lost a race"
            ),
            Err(e) => warn!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                error = %e,
                "Prefix add failed"
            ),
        }
        result
    }

    async fn update(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        let result = self.inner.update(prefix, opts).await;
        match &result {
            Ok(()) => debug!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                expirable = opts.expirable,
                "Prefix updated"
            ),
            Err(e) => warn!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                error = %e,
                "Prefix update failed"
            ),
        }
        result
    }

    async fn delete(&self, prefix: &Prefix) -> Result<()> {
        let result = self.inner.delete(prefix).await;
        match &result {
            Ok(()) => info!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                "Prefix deleted"
            ),
            Err(e) => warn!(
                name = prefix.name(),
                cidr = prefix.cidr(),
                parent = parent_name(prefix),
                error = %e,
                "Prefix delete failed"
            ),
        }
        result
    }

    async fn get(&self, name: &str, parent: Option<&Prefix>) -> Result<Option<Prefix>> {
        self.inner.get(name, parent).await
    }

    async fn get_children(&self, parent: &Prefix) -> Result<Vec<Prefix>> {
        self.inner.get_children(parent).await
    }
}
