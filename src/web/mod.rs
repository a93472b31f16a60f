//! REST API server.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::monitor::Monitor;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub monitor: Arc<Monitor>,
    pub scheduler: Arc<Scheduler>,
}

/// Web server for urlmon.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        monitor: Arc<Monitor>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                monitor,
                scheduler,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route(
                "/api/urls",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route(
                "/api/urls/{id}",
                put(handlers::handle_update_target).delete(handlers::handle_delete_target),
            )
            .route("/api/urls/{id}/status", get(handlers::handle_get_status))
            .route(
                "/api/urls/{id}/subsequent-requests",
                get(handlers::handle_get_subsequent_requests),
            )
            .route("/api/urls/{id}/alert-state", get(handlers::handle_get_alert_state))
            .route(
                "/api/subsequent-requests/filters",
                get(handlers::handle_get_filter_options),
            )
            .route("/api/health", get(handlers::handle_health))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
