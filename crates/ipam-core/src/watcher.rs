//! Conduit watcher
//!
//! Follows the external configuration service's view of which conduits exist
//! in a trench and mirrors it into every per-family [`Trench`]. Each
//! notification carries the complete conduit set, so the watcher diffs it
//! against what it applied last.

use crate::{Result, Trench};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use ipam_store::TaskHandle;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Something conduits can be added to and removed from
#[async_trait]
pub trait TrenchWatcher: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    /// Make sure the conduit exists
    async fn add_conduit(&self, name: &str) -> Result<()>;

    /// Make sure the conduit is gone
    async fn remove_conduit(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl TrenchWatcher for Trench {
    fn name(&self) -> &str {
        Trench::name(self)
    }

    async fn add_conduit(&self, name: &str) -> Result<()> {
        Trench::add_conduit(self, name).await.map(|_| ())
    }

    async fn remove_conduit(&self, name: &str) -> Result<()> {
        Trench::remove_conduit(self, name).await
    }
}

/// Stream of complete conduit-name sets
pub type ConduitStream = BoxStream<'static, Result<Vec<String>>>;

/// Subscription to conduit changes of a trench
#[async_trait]
pub trait ConduitSource: Send + Sync {
    /// Open a watch on `trench`
    ///
    /// The stream yields the full current set on every change. It may end or
    /// fail at any time; the watcher reconnects.
    async fn watch(&self, trench: &str) -> Result<ConduitStream>;
}

/// A conduit source fed through a channel
///
/// Every [`ConduitSource::watch`] call reads from the same channel, so a
/// reconnect picks up where the previous stream stopped.
#[derive(Clone)]
pub struct ChannelConduitSource {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Result<Vec<String>>>>>,
    watches: Arc<AtomicUsize>,
}

/// Sending half of a [`ChannelConduitSource`]
pub type ConduitSender = mpsc::UnboundedSender<Result<Vec<String>>>;

impl ChannelConduitSource {
    /// Create a source and the sender that feeds it
    pub fn channel() -> (Self, ConduitSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            rx: Arc::new(Mutex::new(rx)),
            watches: Arc::new(AtomicUsize::new(0)),
        };
        (source, tx)
    }

    /// Number of watches opened so far
    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConduitSource for ChannelConduitSource {
    async fn watch(&self, _trench: &str) -> Result<ConduitStream> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let rx = self.rx.clone();
        let stream = stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await;
            item.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

/// Apply the difference between `current` and `new` to every trench
///
/// Returns the set that is now tracked. Failures are logged per trench and do
/// not stop the others.
pub async fn set_conduits(
    trenches: &[Arc<dyn TrenchWatcher>],
    current: &BTreeSet<String>,
    new: &[String],
) -> BTreeSet<String> {
    let wanted: BTreeSet<String> = new.iter().filter(|n| !n.is_empty()).cloned().collect();

    for name in &wanted {
        for trench in trenches {
            if let Err(e) = trench.add_conduit(name).await {
                warn!(trench = trench.name(), conduit = %name, error = %e, "Failed to add conduit");
            }
        }
    }
    for name in current.difference(&wanted) {
        for trench in trenches {
            match trench.remove_conduit(name).await {
                Ok(()) => info!(trench = trench.name(), conduit = %name, "Conduit removed"),
                Err(e) => {
                    warn!(trench = trench.name(), conduit = %name, error = %e, "Failed to remove conduit")
                }
            }
        }
    }

    wanted
}

/// Shortest reconnect delay; smaller configured delays are raised to this
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Reconnect delays for the watch loop
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// First delay after a failure
    pub retry_delay: Duration,
    /// Upper bound for the doubling delay
    pub max_retry_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Keeps the trenches in line with a [`ConduitSource`]
pub struct ConduitWatcher {
    trench_name: String,
    source: Arc<dyn ConduitSource>,
    trenches: Vec<Arc<dyn TrenchWatcher>>,
    config: WatcherConfig,
}

impl ConduitWatcher {
    /// Create a watcher for the trench called `trench_name`
    ///
    /// Delays are raised to at least [`MIN_RETRY_DELAY`], and the upper bound
    /// to at least the first delay.
    pub fn new(
        trench_name: impl Into<String>,
        source: Arc<dyn ConduitSource>,
        trenches: Vec<Arc<dyn TrenchWatcher>>,
        mut config: WatcherConfig,
    ) -> Self {
        config.retry_delay = config.retry_delay.max(MIN_RETRY_DELAY);
        config.max_retry_delay = config.max_retry_delay.max(config.retry_delay);
        Self {
            trench_name: trench_name.into(),
            source,
            trenches,
            config,
        }
    }

    /// Run until `shutdown` fires, reconnecting after every failure or stream end
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        info!(trench = %self.trench_name, "Conduit watcher started");
        let mut known = BTreeSet::new();
        let mut delay = self.config.retry_delay;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.follow(&mut known, &mut delay) => match result {
                    Ok(()) => debug!(trench = %self.trench_name, "Conduit stream ended, reconnecting"),
                    Err(e) => warn!(trench = %self.trench_name, error = %e, "Conduit watch failed, reconnecting"),
                },
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.max_retry_delay);
        }
        info!(trench = %self.trench_name, "Conduit watcher stopped");
    }

    /// Follow one watch stream to its end
    async fn follow(&self, known: &mut BTreeSet<String>, delay: &mut Duration) -> Result<()> {
        let mut conduits = self.source.watch(&self.trench_name).await?;
        while let Some(batch) = conduits.next().await {
            let batch = batch?;
            *delay = self.config.retry_delay;
            debug!(trench = %self.trench_name, conduits = ?batch, "Conduit update");
            *known = set_conduits(&self.trenches, known, &batch).await;
        }
        Ok(())
    }

    /// Run in a background task
    pub fn spawn(self) -> TaskHandle {
        TaskHandle::spawn("conduit-watcher", move |shutdown| async move {
            self.run(shutdown).await;
        })
    }
}
