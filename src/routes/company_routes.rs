// src/routes/company_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::{
    error::ApiError,
    models::{AppState, Company, CompanyPatch, NewCompany},
    routes::{ok, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/companies", get(list_companies).post(create_company))
        .route(
            "/companies/{company_id}",
            get(get_company).patch(update_company).delete(delete_company),
        )
}

pub async fn list_companies(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<Company>>>, ApiError> {
    Ok(ok(state.engine.list_companies().await?))
}

pub async fn get_company(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<Json<ApiOk<Company>>, ApiError> {
    Ok(ok(state.engine.get_company(&company_id).await?))
}

pub async fn create_company(
    State(state): State<AppState>,
    Json(req): Json<NewCompany>,
) -> Result<Json<ApiOk<Company>>, ApiError> {
    Ok(ok(state.engine.create_company(req).await?))
}

pub async fn update_company(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    Json(req): Json<CompanyPatch>,
) -> Result<Json<ApiOk<Company>>, ApiError> {
    Ok(ok(state.engine.update_company(&company_id, req).await?))
}

pub async fn delete_company(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    state.engine.delete_company(&company_id).await?;
    Ok(ok(serde_json::json!({ "deleted": company_id })))
}
