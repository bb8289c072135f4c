//! Management API Routes

use super::handlers::*;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

/// Management API router
pub struct ManagementApi;

impl ManagementApi {
    /// Create the management API router
    pub fn create_router(state: AppState) -> Router {
        let api_routes = Router::new()
            // Fleet views
            .route("/servers/status", get(get_servers_status))
            .route("/metrics", get(get_metrics))
            .route("/metrics/prometheus", get(get_metrics_prometheus))
            .route("/health", get(get_health))
            .route("/selection/strategies", get(get_selection_strategies))
            .route("/tools/status", get(get_tools_status))
            // Per-server views and actions
            .route("/servers/:name/details", get(get_server_details))
            .route("/servers/:name/health-check", post(trigger_health_check))
            .route("/servers/:name/reinitialize-tools", post(reinitialize_tools))
            .route("/servers/:name", delete(delete_server))
            .with_state(state);

        Router::new()
            .nest("/api", api_routes)
            .layer(CorsLayer::permissive())
    }
}
