//! Handle to a stoppable background task

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

/// A spawned background loop together with its shutdown signal
///
/// The task is expected to `select!` on the receiving half and return once it
/// fires. Dropping the handle without calling [`TaskHandle::stop`] also
/// signals the task, since the sender closes.
pub struct TaskHandle {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `task`, handing it the shutdown receiver
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(task(shutdown_rx));
        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            join,
        }
    }

    /// Task name, for logging
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has already returned
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task and wait for it to return
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.join).await {
            warn!(task = self.name, error = %e, "Background task ended abnormally");
        }
    }
}
