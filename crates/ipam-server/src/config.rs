//! Server configuration

use ipam_core::{
    cidr, Cidr, IpFamily, IpamError, PrefixLengths, Result, ServiceConfig, TrenchPool, WatcherConfig,
};
use ipam_store::GcConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// IPAM server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// SQLite database file
    pub datastore: String,
    /// Use the volatile in-memory store (single process, lost on restart)
    pub use_memory_store: bool,
    /// Trench served by this instance
    pub trench_name: String,
    /// Base URL of the configuration-distribution service
    pub nsp_url: String,
    /// `ipv4`, `ipv6` or `dualstack`
    pub ip_family: String,
    /// IPv4 root pool
    pub prefix_ipv4: String,
    pub conduit_prefix_length_ipv4: u8,
    pub node_prefix_length_ipv4: u8,
    /// IPv6 root pool
    pub prefix_ipv6: String,
    pub conduit_prefix_length_ipv6: u8,
    pub node_prefix_length_ipv6: u8,
    /// Run the garbage collector (SQLite only)
    pub gc_enabled: bool,
    /// Seconds between sweeps
    pub gc_interval_secs: u64,
    /// Seconds after which an unrefreshed prefix is stale
    pub gc_threshold_secs: u64,
    /// Skip node refresh writes younger than this many seconds
    pub node_update_damping_secs: u64,
    /// Deadline for every Allocate/Release, in seconds
    pub request_timeout_secs: u64,
    /// Sleep between conduit-existence polls, in milliseconds
    pub conduit_poll_interval_ms: u64,
    /// First watcher reconnect delay, in milliseconds
    pub watch_retry_delay_ms: u64,
    /// Upper bound for the watcher reconnect delay, in milliseconds
    pub watch_max_retry_delay_ms: u64,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            datastore: "/run/ipam/data/registry.db".to_string(),
            use_memory_store: false,
            trench_name: "default".to_string(),
            nsp_url: "http://nsp-service:7778".to_string(),
            ip_family: "dualstack".to_string(),
            prefix_ipv4: "169.255.0.0/16".to_string(),
            conduit_prefix_length_ipv4: 20,
            node_prefix_length_ipv4: 24,
            prefix_ipv6: "fd00::/48".to_string(),
            conduit_prefix_length_ipv6: 56,
            node_prefix_length_ipv6: 64,
            gc_enabled: true,
            gc_interval_secs: 60 * 60,
            gc_threshold_secs: 24 * 60 * 60,
            node_update_damping_secs: 60,
            request_timeout_secs: 30,
            conduit_poll_interval_ms: 100,
            watch_retry_delay_ms: 500,
            watch_max_retry_delay_ms: 5000,
        }
    }
}

impl IpamConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject timing settings that would stall or spin the background loops
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(IpamError::InvalidRequest(msg.to_string()));
        if self.gc_enabled && self.gc_interval_secs == 0 {
            return invalid("gc interval must be at least one second");
        }
        if self.request_timeout_secs == 0 {
            return invalid("request timeout must be at least one second");
        }
        if self.conduit_poll_interval_ms == 0 {
            return invalid("conduit poll interval must be non-zero");
        }
        if self.watch_retry_delay_ms == 0 {
            return invalid("watch retry delay must be non-zero");
        }
        if self.watch_max_retry_delay_ms < self.watch_retry_delay_ms {
            return invalid("watch max retry delay must not be below the retry delay");
        }
        Ok(())
    }

    /// Families to serve according to `ip_family`
    pub fn families(&self) -> Result<Vec<IpFamily>> {
        match self.ip_family.to_ascii_lowercase().as_str() {
            "dualstack" => Ok(IpFamily::all().to_vec()),
            other => Ok(vec![other.parse()?]),
        }
    }

    /// Validated root pool of every configured family
    pub fn pools(&self) -> Result<Vec<TrenchPool>> {
        self.families()?
            .into_iter()
            .map(|family| {
                let (block, conduit, node) = match family {
                    IpFamily::Ipv4 => (
                        &self.prefix_ipv4,
                        self.conduit_prefix_length_ipv4,
                        self.node_prefix_length_ipv4,
                    ),
                    IpFamily::Ipv6 => (
                        &self.prefix_ipv6,
                        self.conduit_prefix_length_ipv6,
                        self.node_prefix_length_ipv6,
                    ),
                };
                let root = Cidr::parse(block)?;
                if !cidr::is_valid_block(block) {
                    return Err(IpamError::InvalidCidr(block.clone()));
                }
                if root.family() != family {
                    return Err(IpamError::InvalidRequest(format!(
                        "{} pool {} is not an {} block",
                        family, block, family
                    )));
                }
                let lengths = PrefixLengths::new(conduit, node, family.max_len());
                lengths.validate(&root)?;
                Ok(TrenchPool {
                    family,
                    cidr: root.to_string(),
                    lengths,
                })
            })
            .collect()
    }

    /// Service timing
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            trench_name: self.trench_name.clone(),
            node_update_damping: Duration::from_secs(self.node_update_damping_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            conduit_poll_interval: Duration::from_millis(self.conduit_poll_interval_ms),
        }
    }

    /// Garbage collector settings
    pub fn gc_config(&self) -> GcConfig {
        GcConfig {
            interval: Duration::from_secs(self.gc_interval_secs),
            threshold: Duration::from_secs(self.gc_threshold_secs),
            ..GcConfig::default()
        }
    }

    /// Watcher reconnect backoff
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            retry_delay: Duration::from_millis(self.watch_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.watch_max_retry_delay_ms),
        }
    }
}
