//! Trench level: root prefix of one address family

use crate::allocate::allocate;
use crate::{cidr, Conduit, IpamError, PrefixLengths, Result};
use ipam_store::{Prefix, Storage, WriteOptions};
use std::sync::Arc;
use tracing::{info, warn};

/// The root prefix of one address family, allocating conduits
#[derive(Clone)]
pub struct Trench {
    prefix: Prefix,
    store: Arc<dyn Storage>,
    lengths: PrefixLengths,
}

impl Trench {
    /// Register the trench root in `store` unless it is already there
    ///
    /// When a root of the same name exists, the stored CIDR wins.
    pub async fn new(prefix: Prefix, store: Arc<dyn Storage>, lengths: PrefixLengths) -> Result<Self> {
        if !prefix.is_root() {
            return Err(IpamError::InvalidRequest(format!(
                "trench {} must be a root prefix",
                prefix.name()
            )));
        }
        if !cidr::is_valid_block(prefix.cidr()) {
            return Err(IpamError::InvalidCidr(prefix.cidr().to_string()));
        }

        let prefix = match store.get(prefix.name(), None).await? {
            Some(existing) => {
                if existing.cidr() != prefix.cidr() {
                    warn!(
                        trench = existing.name(),
                        stored = existing.cidr(),
                        configured = prefix.cidr(),
                        "Trench already stored with another cidr, keeping the stored one"
                    );
                }
                existing
            }
            None => {
                let added = store.add(&prefix, &WriteOptions::default()).await;
                match added {
                    Ok(()) => {
                        info!(trench = prefix.name(), cidr = prefix.cidr(), "Trench registered");
                        prefix
                    }
                    Err(e) => {
                        let e = IpamError::from(e);
                        if !e.is_already_exists() {
                            return Err(e);
                        }
                        store.get(prefix.name(), None).await?.ok_or(e)?
                    }
                }
            }
        };

        Ok(Self {
            prefix,
            store,
            lengths,
        })
    }

    /// Get the underlying prefix
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Trench name
    pub fn name(&self) -> &str {
        self.prefix.name()
    }

    /// Trench CIDR
    pub fn cidr(&self) -> &str {
        self.prefix.cidr()
    }

    /// Lengths used below this trench
    pub fn lengths(&self) -> &PrefixLengths {
        &self.lengths
    }

    fn wrap(&self, prefix: Prefix) -> Conduit {
        Conduit::new(prefix, self.store.clone(), self.lengths)
    }

    /// Look up a conduit without creating it
    pub async fn get_conduit(&self, name: &str) -> Result<Option<Conduit>> {
        let prefix = self.store.get(name, Some(&self.prefix)).await?;
        Ok(prefix.map(|p| self.wrap(p)))
    }

    /// Return the conduit called `name`, allocating it if needed
    pub async fn add_conduit(&self, name: &str) -> Result<Conduit> {
        if let Some(conduit) = self.get_conduit(name).await? {
            return Ok(conduit);
        }
        let opts = WriteOptions::default();
        match allocate(
            self.store.as_ref(),
            &self.prefix,
            name,
            self.lengths.conduit_length,
            &opts,
        )
        .await
        {
            Ok(prefix) => Ok(self.wrap(prefix)),
            Err(e) if e.is_already_exists() => self
                .get_conduit(name)
                .await?
                .ok_or_else(|| IpamError::id_collision(name, &self.prefix)),
            Err(e) => Err(e),
        }
    }

    /// Delete the conduit called `name` and everything under it
    pub async fn remove_conduit(&self, name: &str) -> Result<()> {
        if let Some(conduit) = self.store.get(name, Some(&self.prefix)).await? {
            self.store.delete(&conduit).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_store::MemoryStorage;

    #[tokio::test]
    async fn test_trench_conduits() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let trench = Trench::new(
            Prefix::root("trench-a", "172.0.0.0/16"),
            store.clone(),
            PrefixLengths::new(20, 24, 32),
        )
        .await
        .unwrap();

        assert!(trench.get_conduit("conduit-a").await.unwrap().is_none());
        let conduit = trench.add_conduit("conduit-a").await.unwrap();
        assert_eq!(conduit.cidr(), "172.0.0.0/20");
        let again = trench.add_conduit("conduit-a").await.unwrap();
        assert_eq!(again.cidr(), "172.0.0.0/20");
        let fetched = trench.get_conduit("conduit-a").await.unwrap().unwrap();
        assert_eq!(fetched.prefix(), conduit.prefix());

        let b = trench.add_conduit("conduit-b").await.unwrap();
        assert_eq!(b.cidr(), "172.0.16.0/20");

        trench.remove_conduit("conduit-a").await.unwrap();
        assert!(trench.get_conduit("conduit-a").await.unwrap().is_none());
        trench.remove_conduit("conduit-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_trench_registration_is_idempotent() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let lengths = PrefixLengths::new(20, 24, 32);
        Trench::new(Prefix::root("trench-a", "172.0.0.0/16"), store.clone(), lengths)
            .await
            .unwrap();
        let reopened = Trench::new(Prefix::root("trench-a", "10.0.0.0/16"), store.clone(), lengths)
            .await
            .unwrap();
        assert_eq!(reopened.cidr(), "172.0.0.0/16");

        let err = Trench::new(Prefix::root("trench-b", "172.0.0.1/16"), store, lengths).await;
        assert!(matches!(err, Err(IpamError::InvalidCidr(_))));
    }

    #[tokio::test]
    async fn test_trench_runs_out_of_conduits() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let trench = Trench::new(
            Prefix::root("trench-a", "172.0.0.0/31"),
            store,
            PrefixLengths::new(32, 32, 32),
        )
        .await
        .unwrap();

        assert_eq!(trench.add_conduit("a").await.unwrap().cidr(), "172.0.0.0/32");
        assert_eq!(trench.add_conduit("b").await.unwrap().cidr(), "172.0.0.1/32");
        let err = trench.add_conduit("c").await.err().unwrap();
        assert!(matches!(err, IpamError::NoSpaceAvailable { .. }));
    }
}
