//! Application state

use crate::config::IpamConfig;
use ipam_core::IpamService;
use ipam_store::{FlexibleStorage, LoggedStorage, Storage};
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    /// Server configuration
    pub config: IpamConfig,
    /// Prefix store (SQLite or memory)
    pub store: FlexibleStorage,
    /// Allocate/Release service
    pub service: Arc<IpamService>,
}

impl AppState {
    /// Open the store and register the configured trenches
    pub async fn new(config: IpamConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let pools = config.pools()?;
        let store = FlexibleStorage::open(&config.datastore, config.use_memory_store).await?;

        if store.is_persistent() {
            info!(datastore = %config.datastore, "Storage mode: SQLite (persistent)");
        } else {
            warn!("Storage mode: in-memory (NOT persistent, single instance only)");
        }

        let logged: Arc<dyn Storage> = Arc::new(LoggedStorage::new(store.clone()));
        let service = IpamService::new(logged, &pools, config.service_config()).await?;

        Ok(Self {
            config,
            store,
            service: Arc::new(service),
        })
    }
}
