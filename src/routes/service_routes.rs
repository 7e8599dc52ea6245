// src/routes/service_routes.rs

use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};

use crate::{
    error::ApiError,
    models::{AppState, Service, ServiceEntry},
    routes::{ok, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/services", post(log_service))
        .route("/services/{service_id}", delete(delete_service))
}

pub async fn log_service(
    State(state): State<AppState>,
    Json(req): Json<ServiceEntry>,
) -> Result<Json<ApiOk<Service>>, ApiError> {
    Ok(ok(state.engine.log_service(req).await?))
}

pub async fn delete_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    state.engine.delete_service(&service_id).await?;
    Ok(ok(serde_json::json!({ "deleted": service_id })))
}
