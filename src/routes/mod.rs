pub mod container_routes;
pub mod tenant_routes;

use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

pub fn app(state: SharedState) -> Router {
    let api = Router::new()
        // Lifecycle operations
        .route(
            "/container/{operation}",
            post(container_routes::run_operation),
        )
        // Tenants
        .route(
            "/tenants",
            get(tenant_routes::list_tenants).post(tenant_routes::create_tenant),
        )
        .route("/tenants/{id}", get(tenant_routes::get_tenant))
        .route("/tenants/{id}/events", get(tenant_routes::tenant_events))
        .with_state(state);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tenantd"
    }))
}
