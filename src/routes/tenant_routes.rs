use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::SharedState;
use crate::store::OperationEvent;
use crate::tenant::{register, NewTenant, TenantView};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

fn view_of(state: &SharedState, tenant_id: &str) -> Result<TenantView, AppError> {
    let tenant = state
        .store()
        .get(tenant_id)
        .map_err(|e| AppError::Internal(e.into()))?
        .ok_or_else(|| AppError::NotFound(format!("tenant {} not found", tenant_id)))?;
    Ok(TenantView::project(
        &tenant,
        &state.config.access_scheme,
        &state.config.domain,
    ))
}

/// GET /api/tenants
pub async fn list_tenants(
    State(state): State<SharedState>,
) -> Result<Json<Vec<TenantView>>, AppError> {
    Ok(Json(state.engine.list()?))
}

/// POST /api/tenants
pub async fn create_tenant(
    State(state): State<SharedState>,
    Json(body): Json<NewTenant>,
) -> Result<(StatusCode, Json<TenantView>), AppError> {
    let tenant = register(state.store(), &state.config, body)?;
    let view = TenantView::project(&tenant, &state.config.access_scheme, &state.config.domain);
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/tenants/{id}
pub async fn get_tenant(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantView>, AppError> {
    Ok(Json(view_of(&state, &tenant_id)?))
}

/// GET /api/tenants/{id}/events?limit=
pub async fn tenant_events(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<OperationEvent>>, AppError> {
    view_of(&state, &tenant_id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = state
        .store()
        .events(&tenant_id, limit)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(Json(events))
}
