//! Project, space and environment endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use keybranch_core::models::{CreatedSpace, Environment, Project, Space};

use crate::api::run_blocking;
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvironmentRequest {
    pub name: String,
    pub branch_id: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/projects", post(create_project))
        .route("/api/projects/:id/spaces", get(list_spaces).post(create_space))
        .route(
            "/api/spaces/:id/environments",
            get(list_environments).post(create_environment),
        )
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NameRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = run_blocking(&state, move |engine| engine.create_project(&body.name)).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn create_space(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(body): Json<NameRequest>,
) -> Result<(StatusCode, Json<CreatedSpace>), AppError> {
    let created = run_blocking(&state, move |engine| {
        engine.create_space(&project_id, &body.name)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_spaces(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Space>>, AppError> {
    let spaces = run_blocking(&state, move |engine| engine.list_spaces(&project_id)).await?;
    Ok(Json(spaces))
}

async fn list_environments(
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
) -> Result<Json<Vec<Environment>>, AppError> {
    let envs = run_blocking(&state, move |engine| engine.list_environments(&space_id)).await?;
    Ok(Json(envs))
}

async fn create_environment(
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
    Json(body): Json<CreateEnvironmentRequest>,
) -> Result<(StatusCode, Json<Environment>), AppError> {
    let env = run_blocking(&state, move |engine| {
        engine.create_environment(&space_id, &body.name, &body.branch_id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(env)))
}
