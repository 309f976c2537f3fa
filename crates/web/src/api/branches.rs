//! Branch and key endpoints: list, fork, inspect, delete, edit keys.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use keybranch_core::models::{Branch, ForkResult, KeyInput, KeyWithTranslations};

use crate::api::status::AppError;
use crate::api::{run_blocking, user_from};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkRequest {
    pub name: String,
    pub from_branch_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/spaces/:id/branches", get(list_branches).post(fork_branch))
        .route("/api/branches/:id", get(get_branch).delete(delete_branch))
        .route("/api/branches/:id/keys", get(list_keys).put(upsert_key))
}

async fn list_branches(
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
) -> Result<Json<Vec<Branch>>, AppError> {
    let branches = run_blocking(&state, move |engine| engine.list_branches(&space_id)).await?;
    Ok(Json(branches))
}

async fn fork_branch(
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ForkRequest>,
) -> Result<(StatusCode, Json<ForkResult>), AppError> {
    let user = body.user_id.clone().or_else(|| user_from(&headers));
    let result = run_blocking(&state, move |engine| {
        engine.fork(&space_id, &body.name, &body.from_branch_id, user.as_deref())
    })
    .await?;
    info!(branch_id = %result.branch.id, key_count = result.key_count, "fork created via API");
    Ok((StatusCode::CREATED, Json(result)))
}

async fn get_branch(
    State(state): State<Arc<AppState>>,
    Path(branch_id): Path<String>,
) -> Result<Json<Branch>, AppError> {
    let branch = run_blocking(&state, move |engine| engine.get_branch(&branch_id)).await?;
    Ok(Json(branch))
}

async fn delete_branch(
    State(state): State<Arc<AppState>>,
    Path(branch_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = user_from(&headers);
    run_blocking(&state, move |engine| {
        engine.delete_branch(&branch_id, user.as_deref())
    })
    .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    Path(branch_id): Path<String>,
) -> Result<Json<Vec<KeyWithTranslations>>, AppError> {
    let keys = run_blocking(&state, move |engine| engine.list_keys(&branch_id)).await?;
    Ok(Json(keys))
}

async fn upsert_key(
    State(state): State<Arc<AppState>>,
    Path(branch_id): Path<String>,
    Json(body): Json<KeyInput>,
) -> Result<Json<KeyWithTranslations>, AppError> {
    let key = run_blocking(&state, move |engine| engine.upsert_key(&branch_id, &body)).await?;
    Ok(Json(key))
}
