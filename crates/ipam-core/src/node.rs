//! Node level: hands out the per-node children

use crate::allocate::allocate_with_blocklist;
use crate::{Cidr, IpamError, PrefixLengths, Result};
use ipam_store::{Prefix, Storage, StoreError, WriteOptions};
use std::sync::Arc;
use tracing::debug;

/// A node prefix, allocating children at the configured child length
#[derive(Clone)]
pub struct Node {
    prefix: Prefix,
    store: Arc<dyn Storage>,
    lengths: PrefixLengths,
}

impl Node {
    /// Wrap an allocated node prefix
    pub fn new(prefix: Prefix, store: Arc<dyn Storage>, lengths: PrefixLengths) -> Self {
        Self {
            prefix,
            store,
            lengths,
        }
    }

    /// Get the underlying prefix
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Node name
    pub fn name(&self) -> &str {
        self.prefix.name()
    }

    /// Node CIDR
    pub fn cidr(&self) -> &str {
        self.prefix.cidr()
    }

    /// Look up a child without creating it
    pub async fn get(&self, name: &str) -> Result<Option<Prefix>> {
        Ok(self.store.get(name, Some(&self.prefix)).await?)
    }

    /// Return the child called `name`, allocating it if needed
    ///
    /// An existing child is refreshed with `opts`. The node's own first and
    /// last address are never handed out.
    pub async fn allocate(&self, name: &str, opts: &WriteOptions) -> Result<Prefix> {
        if let Some(existing) = self.get(name).await? {
            match self.store.update(&existing, opts).await {
                Ok(()) => return Ok(existing),
                // Collected between the read and the refresh
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let blocklist = self.blocklist()?;
        match allocate_with_blocklist(
            self.store.as_ref(),
            &self.prefix,
            name,
            self.lengths.child_length,
            &blocklist,
            opts,
        )
        .await
        {
            Err(e) if e.is_already_exists() => {
                debug!(name, node = self.name(), "Child allocated concurrently");
                self.get(name)
                    .await?
                    .ok_or_else(|| IpamError::id_collision(name, &self.prefix))
            }
            result => result,
        }
    }

    /// Delete the child called `name`; a missing child is not an error
    pub async fn release(&self, name: &str) -> Result<()> {
        if let Some(child) = self.get(name).await? {
            self.store.delete(&child).await?;
        }
        Ok(())
    }

    /// First and last address of the node at child length
    fn blocklist(&self) -> Result<[Cidr; 2]> {
        let block = Cidr::parse(self.cidr())?;
        let child_length = self.lengths.child_length;
        if child_length < block.prefix_len() {
            return Err(IpamError::InvalidLength {
                requested: child_length,
                parent: block.prefix_len(),
                max: block.family().max_len(),
            });
        }
        Ok([
            Cidr::new(block.address(), child_length)?,
            Cidr::new(block.last_address(), child_length)?,
        ])
    }
}
