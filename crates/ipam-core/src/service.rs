//! Allocate/Release facade over the per-family trenches

use crate::watcher::TrenchWatcher;
use crate::{cidr::Cidr, trench_name_for, IpFamily, IpamError, Result, Trench, TrenchPool};
use ipam_store::{Prefix, Storage, WriteOptions, BRIDGE_PREFIX_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Trench reference in a request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrenchRef {
    #[serde(default)]
    pub name: String,
}

/// Conduit reference in a request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConduitRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub trench: Option<TrenchRef>,
}

/// Where the child lives
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// `ipv4` or `ipv6`
    #[serde(default)]
    pub ip_family: String,
    /// Node name
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub conduit: Option<ConduitRef>,
}

/// An Allocate/Release request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    /// Child name, unique per node
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subnet: Subnet,
}

impl Child {
    /// Build a request for `name` on `node` in `conduit` of `trench`
    pub fn new(
        name: impl Into<String>,
        family: IpFamily,
        trench: impl Into<String>,
        conduit: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subnet: Subnet {
                ip_family: family.to_string(),
                node: node.into(),
                conduit: Some(ConduitRef {
                    name: conduit.into(),
                    trench: Some(TrenchRef { name: trench.into() }),
                }),
            },
        }
    }
}

/// An allocated block as returned to the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedBlock {
    /// Base address of the block
    pub address: String,
    /// The family's child length
    pub prefix_length: u8,
}

/// Service timing and naming
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Trench served by this instance
    pub trench_name: String,
    /// Node refreshes younger than this are skipped
    pub node_update_damping: Duration,
    /// Deadline applied by [`IpamService::allocate`] and [`IpamService::release`]
    pub request_timeout: Duration,
    /// Sleep between conduit-existence polls
    pub conduit_poll_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            trench_name: "default".to_string(),
            node_update_damping: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            conduit_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Resolved, validated request
struct Target<'a> {
    trench: &'a Trench,
    conduit: &'a str,
    node: &'a str,
    child: &'a str,
}

/// The IPAM service: one trench per configured address family
pub struct IpamService {
    trenches: BTreeMap<IpFamily, Arc<Trench>>,
    config: ServiceConfig,
}

impl IpamService {
    /// Register a trench for every pool and build the service
    pub async fn new(store: Arc<dyn Storage>, pools: &[TrenchPool], config: ServiceConfig) -> Result<Self> {
        let mut trenches = BTreeMap::new();
        for pool in pools {
            if trenches.contains_key(&pool.family) {
                return Err(IpamError::InvalidRequest(format!(
                    "more than one pool for {}",
                    pool.family
                )));
            }
            let root = Cidr::parse(&pool.cidr)?;
            if root.family() != pool.family {
                return Err(IpamError::InvalidRequest(format!(
                    "pool {} is not {}",
                    pool.cidr, pool.family
                )));
            }
            pool.lengths.validate(&root)?;
            let name = trench_name_for(&config.trench_name, pool.family);
            let trench = Trench::new(Prefix::root(name, pool.cidr.clone()), store.clone(), pool.lengths).await?;
            info!(
                trench = trench.name(),
                cidr = trench.cidr(),
                family = %pool.family,
                "Serving trench"
            );
            trenches.insert(pool.family, Arc::new(trench));
        }
        if trenches.is_empty() {
            return Err(IpamError::InvalidRequest("no address family configured".to_string()));
        }
        Ok(Self { trenches, config })
    }

    /// Get the service configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Families served
    pub fn families(&self) -> Vec<IpFamily> {
        self.trenches.keys().copied().collect()
    }

    /// Trench of a family
    pub fn trench(&self, family: IpFamily) -> Option<&Arc<Trench>> {
        self.trenches.get(&family)
    }

    /// Every trench, as watcher targets
    pub fn trench_watchers(&self) -> Vec<Arc<dyn TrenchWatcher>> {
        self.trenches
            .values()
            .map(|t| t.clone() as Arc<dyn TrenchWatcher>)
            .collect()
    }

    /// Allocate within the configured request timeout
    pub async fn allocate(&self, child: &Child) -> Result<AllocatedBlock> {
        self.allocate_until(child, Instant::now() + self.config.request_timeout)
            .await
    }

    /// Allocate, giving up at `deadline`
    pub async fn allocate_until(&self, child: &Child, deadline: Instant) -> Result<AllocatedBlock> {
        with_deadline(deadline, self.do_allocate(child)).await
    }

    /// Release within the configured request timeout
    pub async fn release(&self, child: &Child) -> Result<()> {
        self.release_until(child, Instant::now() + self.config.request_timeout)
            .await
    }

    /// Release, giving up at `deadline`
    pub async fn release_until(&self, child: &Child, deadline: Instant) -> Result<()> {
        with_deadline(deadline, self.do_release(child)).await
    }

    fn resolve<'a>(&'a self, child: &'a Child) -> Result<(IpFamily, Target<'a>)> {
        let family: IpFamily = child.subnet.ip_family.parse()?;
        let trench = self.trenches.get(&family).ok_or_else(|| {
            IpamError::InvalidRequest(format!("cannot allocate in this ip family: {}", family))
        })?;
        let conduit = child
            .subnet
            .conduit
            .as_ref()
            .ok_or_else(|| IpamError::InvalidRequest("request has no conduit".to_string()))?;
        let trench_ref = conduit
            .trench
            .as_ref()
            .ok_or_else(|| IpamError::InvalidRequest("request has no trench".to_string()))?;
        if trench_name_for(&trench_ref.name, family) != trench.name() {
            return Err(IpamError::InvalidRequest(format!(
                "no corresponding trench: {}",
                trench_ref.name
            )));
        }
        for (what, value) in [
            ("child name", &child.name),
            ("node name", &child.subnet.node),
            ("conduit name", &conduit.name),
        ] {
            if value.is_empty() {
                return Err(IpamError::InvalidRequest(format!("{} cannot be empty", what)));
            }
        }
        Ok((
            family,
            Target {
                trench: trench.as_ref(),
                conduit: &conduit.name,
                node: &child.subnet.node,
                child: &child.name,
            },
        ))
    }

    #[instrument(skip(self, child), fields(child = %child.name, node = %child.subnet.node))]
    async fn do_allocate(&self, child: &Child) -> Result<AllocatedBlock> {
        let (family, target) = self.resolve(child)?;

        // The watcher adds conduits asynchronously; wait for it to catch up
        let conduit = loop {
            if let Some(conduit) = target.trench.get_conduit(target.conduit).await? {
                break conduit;
            }
            debug!(conduit = target.conduit, "Conduit not known yet, waiting");
            tokio::time::sleep(self.config.conduit_poll_interval).await;
        };

        let refresh = WriteOptions::expirable().with_damping(self.config.node_update_damping);
        let node = conduit.get_node(target.node, &refresh).await?;

        let child_opts = refresh
            .clone()
            .with_expirable(target.child != BRIDGE_PREFIX_NAME);
        let prefix = node.allocate(target.child, &child_opts).await?;

        let block = Cidr::parse(prefix.cidr())?;
        let lengths = target.trench.lengths();
        info!(family = %family, cidr = prefix.cidr(), "Allocated");
        Ok(AllocatedBlock {
            address: block.address().to_string(),
            prefix_length: lengths.child_length,
        })
    }

    #[instrument(skip(self, child), fields(child = %child.name, node = %child.subnet.node))]
    async fn do_release(&self, child: &Child) -> Result<()> {
        let (_, target) = self.resolve(child)?;

        let Some(conduit) = target.trench.get_conduit(target.conduit).await? else {
            debug!(conduit = target.conduit, "Release for unknown conduit");
            return Ok(());
        };
        let Some(node) = conduit.lookup_node(target.node).await? else {
            debug!("Release for unknown node");
            return Ok(());
        };
        node.release(target.child).await?;
        info!("Released");
        Ok(())
    }
}

async fn with_deadline<T>(deadline: Instant, operation: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout_at(deadline, operation)
        .await
        .map_err(|_| IpamError::Cancelled)?
}
