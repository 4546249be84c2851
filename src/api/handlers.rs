use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use super::error::ApiJson;
use super::state::AppState;
use crate::battle::{MultiStarted, StartBattle, StartMulti};
use crate::error::{ArenaError, Result};
use crate::evolution::{Evaluation, EvolutionResult, EvolveRequest};
use crate::model::{BattleRun, Capsule, NewCapsule};
use crate::status::RunStatusView;

pub async fn create_capsule(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewCapsule>,
) -> Result<(StatusCode, Json<Capsule>)> {
    let capsule = state.registry.create(new).await?;
    tracing::info!(capsule_id = %capsule.id, name = %capsule.name, role = %capsule.role, "capsule registered");
    Ok((StatusCode::CREATED, Json(capsule)))
}

pub async fn list_capsules(State(state): State<AppState>) -> Result<Json<Vec<Capsule>>> {
    Ok(Json(state.registry.list().await?))
}

pub async fn get_capsule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Capsule>> {
    state
        .registry
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ArenaError::capsule_not_found(&id))
}

pub async fn start_battle(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StartBattle>,
) -> Result<Json<Value>> {
    let run_id = state.scheduler.start(req).await?;
    Ok(Json(json!({ "run_id": run_id, "status": "started" })))
}

pub async fn start_multi(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StartMulti>,
) -> Result<Json<MultiStarted>> {
    Ok(Json(state.scheduler.start_multi(req).await?))
}

pub async fn list_battles(State(state): State<AppState>) -> Result<Json<Value>> {
    let runs = state.status.list().await?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn stop_battle(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>> {
    state.scheduler.stop(&run_id).await?;
    Ok(Json(json!({ "run_id": run_id, "status": "stop_requested" })))
}

pub async fn battle_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusView>> {
    Ok(Json(state.status.status(&run_id).await?))
}

pub async fn battle_get(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<BattleRun>> {
    Ok(Json(state.status.get(&run_id).await?))
}

pub async fn evolve_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Evaluation>> {
    Ok(Json(state.status.evaluate(&run_id).await?))
}

/// The body is optional: an empty request means "use the decision rule".
pub async fn evolve(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<Json<EvolutionResult>> {
    let req = parse_optional::<EvolveRequest>(&body)?;
    Ok(Json(state.evolution.evolve(&run_id, &req).await?))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "metrics recorder not installed" })),
        )
            .into_response(),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "active_runs": state.status.active_runs(),
    }))
}

pub async fn not_found(uri: Uri) -> ArenaError {
    ArenaError::NotFound {
        kind: "route",
        id: uri.path().to_owned(),
    }
}

fn parse_optional<T>(body: &[u8]) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ArenaError::Validation(e.to_string()))
}
