//! IPAM - hierarchical prefix allocation for trenches, conduits and nodes

use clap::Parser;
use ipam_server::{run_server, IpamConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ipam")]
#[command(about = "Hierarchical CIDR allocation for trenches, conduits and nodes")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "IPAM_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "7777", env = "IPAM_PORT")]
    port: u16,

    /// SQLite database file
    #[arg(long, default_value = "/run/ipam/data/registry.db", env = "IPAM_DATASTORE")]
    datastore: String,

    /// Use in-memory storage (single instance, data will not persist)
    #[arg(long, env = "IPAM_MEMORY_STORE")]
    memory_store: bool,

    /// Trench served by this instance
    #[arg(long, default_value = "default", env = "IPAM_TRENCH_NAME")]
    trench_name: String,

    /// Configuration-distribution service URL
    #[arg(long, default_value = "http://nsp-service:7778", env = "IPAM_NSP_URL")]
    nsp_url: String,

    /// ipv4, ipv6 or dualstack
    #[arg(long, default_value = "dualstack", env = "IPAM_IP_FAMILY")]
    ip_family: String,

    /// IPv4 root pool
    #[arg(long, default_value = "169.255.0.0/16", env = "IPAM_PREFIX_IPV4")]
    prefix_ipv4: String,

    /// IPv4 conduit prefix length
    #[arg(long, default_value = "20", env = "IPAM_CONDUIT_PREFIX_LENGTH_IPV4")]
    conduit_prefix_length_ipv4: u8,

    /// IPv4 node prefix length
    #[arg(long, default_value = "24", env = "IPAM_NODE_PREFIX_LENGTH_IPV4")]
    node_prefix_length_ipv4: u8,

    /// IPv6 root pool
    #[arg(long, default_value = "fd00::/48", env = "IPAM_PREFIX_IPV6")]
    prefix_ipv6: String,

    /// IPv6 conduit prefix length
    #[arg(long, default_value = "56", env = "IPAM_CONDUIT_PREFIX_LENGTH_IPV6")]
    conduit_prefix_length_ipv6: u8,

    /// IPv6 node prefix length
    #[arg(long, default_value = "64", env = "IPAM_NODE_PREFIX_LENGTH_IPV6")]
    node_prefix_length_ipv6: u8,

    /// Disable garbage collection of stale prefixes
    #[arg(long, env = "IPAM_NO_GC")]
    no_gc: bool,

    /// Seconds between garbage collection sweeps
    #[arg(long, default_value = "3600", env = "IPAM_GC_INTERVAL")]
    gc_interval: u64,

    /// Seconds after which an unrefreshed prefix is collected
    #[arg(long, default_value = "86400", env = "IPAM_GC_THRESHOLD")]
    gc_threshold: u64,

    /// Seconds during which repeated node refreshes are skipped
    #[arg(long, default_value = "60", env = "IPAM_NODE_UPDATE_DAMPING")]
    node_update_damping: u64,

    /// Seconds allowed for each Allocate/Release
    #[arg(long, default_value = "30", env = "IPAM_REQUEST_TIMEOUT")]
    request_timeout: u64,

    /// Enable debug logging
    #[arg(short, long, env = "IPAM_DEBUG")]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, env = "IPAM_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "ipam={0},ipam_server={0},ipam_core={0},ipam_store={0},tower_http=info",
            log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting IPAM on {}:{}", args.host, args.port);
    tracing::info!(
        trench = %args.trench_name,
        ip_family = %args.ip_family,
        "Serving trench"
    );

    if args.memory_store {
        tracing::warn!("Using in-memory storage - allocations will NOT persist!");
    }

    let config = IpamConfig {
        host: args.host,
        port: args.port,
        datastore: args.datastore,
        use_memory_store: args.memory_store,
        trench_name: args.trench_name,
        nsp_url: args.nsp_url,
        ip_family: args.ip_family,
        prefix_ipv4: args.prefix_ipv4,
        conduit_prefix_length_ipv4: args.conduit_prefix_length_ipv4,
        node_prefix_length_ipv4: args.node_prefix_length_ipv4,
        prefix_ipv6: args.prefix_ipv6,
        conduit_prefix_length_ipv6: args.conduit_prefix_length_ipv6,
        node_prefix_length_ipv6: args.node_prefix_length_ipv6,
        gc_enabled: !args.no_gc,
        gc_interval_secs: args.gc_interval,
        gc_threshold_secs: args.gc_threshold,
        node_update_damping_secs: args.node_update_damping,
        request_timeout_secs: args.request_timeout,
        ..Default::default()
    };

    run_server(config).await
}
