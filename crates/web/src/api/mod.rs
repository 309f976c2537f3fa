//! REST API endpoint modules.

pub mod activity;
pub mod branches;
pub mod merge;
pub mod projects;
pub mod status;

use std::sync::Arc;

use axum::http::HeaderMap;

use keybranch_core::errors::BranchError;
use keybranch_core::BranchEngine;

use crate::api::status::AppError;
use crate::AppState;

/// Header carrying the acting user for activity entries. Authentication
/// happens in front of this service; the value is recorded as-is.
pub const USER_HEADER: &str = "x-keybranch-user";

/// Run a blocking engine call on the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, AppError>
where
    F: FnOnce(&BranchEngine) -> Result<T, BranchError> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| AppError::Internal(format!("engine task failed: {}", e)))?
        .map_err(AppError::from)
}

pub(crate) fn user_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
