//! REST surface.
//!
//! Handlers are thin: they decode the request, call one engine component
//! and encode the result. Every error leaves as `{"detail": "..."}` with the
//! status code of its [`ArenaError`](crate::error::ArenaError) kind.

pub mod error;
mod handlers;
pub mod state;

use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ArenaError, Result};
use crate::observability::metrics;

pub use error::ApiJson;
pub use state::{AppState, Components};

/// Builds the router for every endpoint.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/capsules", post(handlers::create_capsule).get(handlers::list_capsules))
        .route("/capsules/{id}", get(handlers::get_capsule))
        .route("/battle/start", post(handlers::start_battle))
        .route("/battle/start_multi", post(handlers::start_multi))
        .route("/battle/list", get(handlers::list_battles))
        .route("/battle/stop/{run_id}", post(handlers::stop_battle))
        .route("/battle/status/{run_id}", get(handlers::battle_status))
        .route("/battle/get/{run_id}", get(handlers::battle_get))
        .route("/evolve/status/{run_id}", get(handlers::evolve_status))
        .route("/evolve/{run_id}", post(handlers::evolve))
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(track_http))
        .with_state(state)
}

async fn track_http(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed();
    metrics::record_http_request(method.as_str(), &path, response.status().as_u16(), elapsed);
    debug!(%method, path = %path, status = response.status().as_u16(), ?elapsed, "request");
    response
}

/// Serves `router` on `listener` until `cancel` fires.
///
/// # Errors
///
/// `Io` if the server fails.
pub async fn serve(router: Router, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(ArenaError::Io)?;
    debug!("HTTP server shut down");
    Ok(())
}
