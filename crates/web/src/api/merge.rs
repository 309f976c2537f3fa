//! Diff preview and merge endpoints.
//!
//! An unresolved merge is a normal `200` response with `success: false` and
//! the conflicts that still need a resolution; only engine failures map to
//! error statuses.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use keybranch_core::models::{DiffResult, MergeRequest, MergeResult};

use crate::api::status::AppError;
use crate::api::{run_blocking, user_from};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/branches/:id/diff/:target_id", get(diff_branches))
        .route("/api/branches/:id/merge", post(merge_branch))
}

async fn diff_branches(
    State(state): State<Arc<AppState>>,
    Path((source_id, target_id)): Path<(String, String)>,
) -> Result<Json<DiffResult>, AppError> {
    let diff = run_blocking(&state, move |engine| engine.diff(&source_id, &target_id)).await?;
    Ok(Json(diff))
}

async fn merge_branch(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MergeRequest>,
) -> Result<Json<MergeResult>, AppError> {
    let user = user_from(&headers);
    let target_id = body.target_branch_id.clone();
    let result = run_blocking(&state, move |engine| {
        engine.merge(&source_id, &body, user.as_deref())
    })
    .await?;

    info!(
        target_branch_id = %target_id,
        success = result.success,
        merged = result.merged,
        "merge request handled"
    );
    Ok(Json(result))
}
