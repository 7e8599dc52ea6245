// src/routes/mod.rs

use axum::{routing::get, Json, Router};
use chrono::NaiveDate;
use serde::Serialize;

use crate::{error::ApiError, models::AppState};

pub mod appointment_routes;
pub mod company_routes;
pub mod patient_routes;
pub mod plan_routes;
pub mod service_routes;
pub mod statistics_routes;


/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiOk<T>> {
    Json(ApiOk { data })
}

/// `YYYY-MM-DD` query parameter; missing or malformed is a validation error.
pub fn parse_day(name: &str, raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{name} is required")))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{name} must be a YYYY-MM-DD date")))
}

pub fn parse_optional_day(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_day(name, Some(s)).map(Some),
        None => Ok(None),
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

async fn health() -> Json<ApiOk<Health>> {
    ok(Health { status: "ok" })
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(company_routes::router())
        .merge(plan_routes::router())
        .merge(patient_routes::router())
        .merge(service_routes::router())
        .merge(appointment_routes::router())
        .merge(statistics_routes::router());

    Router::new().nest("/api/v1", api).with_state(state)
}
