//! Server startup and lifecycle

use crate::{conduits::HttpConduitSource, routes, AppState, IpamConfig};
use ipam_core::ConduitWatcher;
use ipam_store::{GarbageCollector, TaskHandle};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Run the IPAM server until Ctrl-C or SIGTERM
pub async fn run_server(config: IpamConfig) -> anyhow::Result<()> {
    run_server_with_shutdown(config, shutdown_signal()).await
}

/// Run server with graceful shutdown
pub async fn run_server_with_shutdown(
    config: IpamConfig,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config.clone()).await?);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    serve(listener, state, shutdown_signal).await
}

/// Serve `state` on an already bound listener
///
/// Background tasks are started first and stopped once the HTTP server has
/// drained.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let tasks = spawn_background_tasks(&state)?;
    let app = routes::create_router(state);

    info!("IPAM listening on http://{}", listener.local_addr()?);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;

    for task in tasks {
        let name = task.name();
        task.stop().await;
        info!(task = name, "Background task stopped");
    }
    result?;

    info!("IPAM shutdown complete");
    Ok(())
}

/// Start the conduit watcher and, on SQLite, the garbage collector
pub fn spawn_background_tasks(state: &AppState) -> anyhow::Result<Vec<TaskHandle>> {
    let config = &state.config;
    let mut tasks = Vec::new();

    let source = HttpConduitSource::new(&config.nsp_url)?;
    info!(nsp = %config.nsp_url, trench = %config.trench_name, "Watching conduits");
    let watcher = ConduitWatcher::new(
        config.trench_name.clone(),
        Arc::new(source),
        state.service.trench_watchers(),
        config.watcher_config(),
    );
    tasks.push(watcher.spawn());

    match state.store.as_sqlite() {
        Some(sqlite) if config.gc_enabled => {
            let gc = GarbageCollector::new(sqlite.clone(), config.gc_config());
            tasks.push(gc.spawn());
        }
        Some(_) => info!("Garbage collection disabled"),
        None => info!("Garbage collection not available for the in-memory store"),
    }

    Ok(tasks)
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
