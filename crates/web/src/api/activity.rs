//! Activity log API endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use keybranch_core::models::ActivityEntry;

use crate::api::run_blocking;
use crate::api::status::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<u32>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/activity", get(list_activity))
}

async fn list_activity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, AppError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let entries = run_blocking(&state, move |engine| engine.list_activity(limit)).await?;
    Ok(Json(entries))
}
