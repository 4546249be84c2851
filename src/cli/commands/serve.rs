//! `serve` handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::config::log_warnings;
use crate::api::{self, AppState, Components};
use crate::cli::args::ServeArgs;
use crate::config::{ConfigLoader, LoaderOptions, StorageBackend};
use crate::error::ArenaError;

/// How long live runs get to record their stop on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Start the HTTP service and block until `cancel` fires.
///
/// Live runs are cancelled on the way out; their records end up `stopped`.
///
/// # Errors
///
/// Returns a config error for an invalid configuration, a persistence error
/// if the store cannot be opened, or an I/O error if binding fails.
pub async fn run(args: &ServeArgs, cancel: CancellationToken) -> Result<(), ArenaError> {
    let options = LoaderOptions {
        bind: args.bind.clone(),
        data_dir: args.data_dir.clone(),
        backend: args.memory_store.then_some(StorageBackend::Memory),
    };
    if let Some(path) = &args.config {
        tracing::info!(config = %path.display(), "loading configuration");
    }
    let load_result = ConfigLoader::new(options).load(args.config.as_deref())?;
    log_warnings(&load_result.warnings);
    let config = load_result.config;

    let components = Components::from_config(&config).await?;
    let mut state = AppState::new(&config, components);
    if !args.no_metrics {
        state = state.with_metrics(crate::observability::init_metrics()?);
        tracing::info!("Prometheus metrics exposed on /metrics");
    }
    tracing::info!(
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        "run store ready"
    );

    let scheduler = Arc::clone(&state.scheduler);
    let router = api::build_router(state, config.server.max_body_bytes);
    let listener = TcpListener::bind(&config.server.bind).await?;
    let bound_addr = listener.local_addr()?;
    tracing::info!(%bound_addr, "HTTP server listening");
    let result = api::serve(router, listener, cancel).await;

    if !scheduler.drain(SHUTDOWN_GRACE).await {
        tracing::warn!("exiting with runs still live; their records stay non-terminal");
    }
    result
}
