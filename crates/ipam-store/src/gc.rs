//! Periodic garbage collection of stale prefixes
//!
//! Nodes and the children under them are written expirable and refreshed on
//! every request. Anything not refreshed within the threshold is assumed to
//! belong to a node or interface that went away, and is removed together
//! with its descendants. Bridge prefixes are never collected.

use crate::{SqliteStorage, TaskHandle};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Default number of expired prefixes removed per statement
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Shortest sweep interval; a zero interval is raised to this
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Garbage collector settings
#[derive(Clone, Debug)]
pub struct GcConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Age after which an expirable prefix is stale
    pub threshold: Duration,
    /// Matched prefixes removed per batch
    pub batch_size: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            threshold: Duration::from_secs(86400),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Sweeps a SQLite store for stale expirable prefixes
pub struct GarbageCollector {
    store: SqliteStorage,
    config: GcConfig,
}

impl GarbageCollector {
    /// Create a collector for `store`
    ///
    /// A zero interval is raised to [`MIN_INTERVAL`].
    pub fn new(store: SqliteStorage, mut config: GcConfig) -> Self {
        if config.interval.is_zero() {
            warn!(
                min_interval_secs = MIN_INTERVAL.as_secs(),
                "Zero garbage collection interval, using the minimum"
            );
            config.interval = MIN_INTERVAL;
        }
        Self { store, config }
    }

    /// Run one sweep, returning the number of rows removed
    pub async fn run_once(&self) -> crate::Result<u64> {
        let deleted = self
            .store
            .collect_expired(self.config.threshold, self.config.batch_size)
            .await?;
        if deleted > 0 {
            info!(deleted, "Garbage collected stale prefixes");
        }
        Ok(deleted)
    }

    /// Start sweeping every interval until the handle is stopped
    ///
    /// The first sweep runs one interval after start. Sweep failures are
    /// logged and the loop carries on.
    pub fn spawn(self) -> TaskHandle {
        TaskHandle::spawn("garbage-collector", move |mut shutdown_rx| async move {
            info!(
                interval_secs = self.config.interval.as_secs(),
                threshold_secs = self.config.threshold.as_secs(),
                "Garbage collector started"
            );
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + self.config.interval,
                self.config.interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Garbage collector stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Garbage collection failed");
                        }
                    }
                }
            }
        })
    }
}
