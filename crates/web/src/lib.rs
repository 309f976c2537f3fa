//! keybranch web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Health endpoint
//! - Project, space and environment management
//! - Branch fork / diff / merge / delete
//! - Key editing
//! - Activity log

pub mod api;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use keybranch_core::BranchEngine;

/// Largest accepted request body. Merge requests carry one resolution per
/// conflicting key and can get large.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: Arc<BranchEngine>,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server around `engine`.
    pub fn new(engine: Arc<BranchEngine>) -> Self {
        Self {
            state: Arc::new(AppState { engine }),
        }
    }

    /// The full application router, with middleware.
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    /// Serve on `listen_addr` until `shutdown` resolves.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}

/// Assemble every API route plus CORS, tracing and the body limit.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(api::USER_HEADER),
        ]);

    Router::new()
        .merge(api::status::routes())
        .merge(api::projects::routes())
        .merge(api::branches::routes())
        .merge(api::merge::routes())
        .merge(api::activity::routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
