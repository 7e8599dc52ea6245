// src/routes/plan_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::{
    error::ApiError,
    models::{AppState, NewPlan, Plan, PlanPatch},
    routes::{ok, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans).post(create_plan))
        .route(
            "/plans/{plan_id}",
            get(get_plan).patch(update_plan).delete(delete_plan),
        )
}

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<ApiOk<Vec<Plan>>>, ApiError> {
    Ok(ok(state.engine.list_plans().await?))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<ApiOk<Plan>>, ApiError> {
    Ok(ok(state.engine.get_plan(&plan_id).await?))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<NewPlan>,
) -> Result<Json<ApiOk<Plan>>, ApiError> {
    Ok(ok(state.engine.create_plan(req).await?))
}

// Renaming a plan does not rewrite descriptions on services already logged.
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<PlanPatch>,
) -> Result<Json<ApiOk<Plan>>, ApiError> {
    Ok(ok(state.engine.update_plan(&plan_id, req).await?))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    state.engine.delete_plan(&plan_id).await?;
    Ok(ok(serde_json::json!({ "deleted": plan_id })))
}
