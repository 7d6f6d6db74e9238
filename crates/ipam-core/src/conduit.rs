//! Conduit level: one node prefix per worker node

use crate::allocate::allocate;
use crate::{IpamError, Node, PrefixLengths, Result};
use ipam_store::{Prefix, Storage, StoreError, WriteOptions};
use std::sync::Arc;
use tracing::debug;

/// A conduit prefix, allocating nodes at the configured node length
#[derive(Clone)]
pub struct Conduit {
    prefix: Prefix,
    store: Arc<dyn Storage>,
    lengths: PrefixLengths,
}

impl Conduit {
    /// Wrap an allocated conduit prefix
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

    /// Conduit name
    pub fn name(&self) -> &str {
        self.prefix.name()
    }

    /// Conduit CIDR
    pub fn cidr(&self) -> &str {
        self.prefix.cidr()
    }

    fn wrap(&self, prefix: Prefix) -> Node {
        Node::new(prefix, self.store.clone(), self.lengths)
    }

    /// Look up a node without creating or refreshing it
    pub async fn lookup_node(&self, name: &str) -> Result<Option<Node>> {
        let prefix = self.store.get(name, Some(&self.prefix)).await?;
        Ok(prefix.map(|p| self.wrap(p)))
    }

    /// Return the node called `name`, allocating it if needed
    ///
    /// An existing node has its timestamp refreshed with `opts`, so a damping
    /// threshold there bounds how often repeated requests write.
    pub async fn get_node(&self, name: &str, opts: &WriteOptions) -> Result<Node> {
        if let Some(existing) = self.store.get(name, Some(&self.prefix)).await? {
            match self.store.update(&existing, opts).await {
                Ok(()) => return Ok(self.wrap(existing)),
                Err(StoreError::NotFound(_)) => {
                    debug!(name, conduit = self.name(), "Node vanished before refresh");
                }
                Err(e) => return Err(e.into()),
            }
        }

        match allocate(
            self.store.as_ref(),
            &self.prefix,
            name,
            self.lengths.node_length,
            opts,
        )
        .await
        {
            Ok(prefix) => Ok(self.wrap(prefix)),
            Err(e) if e.is_already_exists() => self
                .lookup_node(name)
                .await?
                .ok_or_else(|| IpamError::id_collision(name, &self.prefix)),
            Err(e) => Err(e),
        }
    }

    /// Delete the node called `name` and everything under it
    pub async fn remove_node(&self, name: &str) -> Result<()> {
        if let Some(node) = self.store.get(name, Some(&self.prefix)).await? {
            self.store.delete(&node).await?;
        }
        Ok(())
    }
}
