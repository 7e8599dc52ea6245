// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    engine::{catalog::SavedPlans, remaining::RemainingCount, AppointmentBoard, DateFilter, ViewQuery},
    error::ApiError,
    models::{AppState, AssignedPlan, GenerationRule, NewPatient, Patient, PatientPatch, Service},
    routes::{ok, parse_optional_day, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(search_patients).post(create_patient))
        .route(
            "/patients/{patient_id}",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
        .route(
            "/patients/{patient_id}/plans",
            get(get_assigned_plans).put(put_assigned_plans),
        )
        .route(
            "/patients/{patient_id}/plans/{plan_id}/generate",
            post(generate_instances),
        )
        .route("/patients/{patient_id}/remaining", get(get_remaining))
        .route("/patients/{patient_id}/services", get(list_services))
        .route("/patients/{patient_id}/agenda", get(get_agenda))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

pub async fn search_patients(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<Patient>>>, ApiError> {
    Ok(ok(state.engine.list_patients(q.query.as_deref()).await?))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    Ok(ok(state.engine.get_patient(&patient_id).await?))
}

pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<NewPatient>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    Ok(ok(state.engine.create_patient(req).await?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Json(req): Json<PatientPatch>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    Ok(ok(state.engine.update_patient(&patient_id, req).await?))
}

/// Assigned plans go with the patient; logged services stay.
pub async fn delete_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    state.engine.delete_patient(&patient_id).await?;
    Ok(ok(serde_json::json!({ "deleted": patient_id })))
}

/* ============================================================
   Assigned plans
   ============================================================ */

pub async fn get_assigned_plans(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<ApiOk<Vec<AssignedPlan>>>, ApiError> {
    Ok(ok(state.engine.assigned_plans(&patient_id).await?))
}

pub async fn put_assigned_plans(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Json(req): Json<Vec<AssignedPlan>>,
) -> Result<Json<ApiOk<SavedPlans>>, ApiError> {
    Ok(ok(state.engine.save_assigned_plans(&patient_id, req).await?))
}

pub async fn generate_instances(
    State(state): State<AppState>,
    Path((patient_id, plan_id)): Path<(String, String)>,
    Json(rule): Json<GenerationRule>,
) -> Result<Json<ApiOk<AssignedPlan>>, ApiError> {
    Ok(ok(state
        .engine
        .generate_for_assignment(&patient_id, &plan_id, rule)
        .await?))
}

pub async fn get_remaining(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<ApiOk<Vec<RemainingCount>>>, ApiError> {
    Ok(ok(state.engine.remaining_for_patient(&patient_id).await?))
}

/* ============================================================
   Services and agenda
   ============================================================ */

pub async fn list_services(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<ApiOk<Vec<Service>>>, ApiError> {
    Ok(ok(state.engine.list_patient_services(&patient_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AgendaQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

fn agenda_filter(q: &AgendaQuery) -> Result<DateFilter, ApiError> {
    let from = parse_optional_day("from", q.from.as_deref())?;
    let to = parse_optional_day("to", q.to.as_deref())?;
    match (from, to) {
        (None, None) => Ok(DateFilter::All),
        (Some(from), Some(to)) if from > to => {
            Err(ApiError::validation("from must not be after to"))
        }
        (Some(from), Some(to)) => Ok(DateFilter::Range { from, to }),
        _ => Err(ApiError::validation("from and to must be given together")),
    }
}

pub async fn get_agenda(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Query(q): Query<AgendaQuery>,
) -> Result<Json<ApiOk<AppointmentBoard>>, ApiError> {
    let filter = agenda_filter(&q)?;
    state.engine.get_patient(&patient_id).await?;
    let board = state
        .engine
        .load_board(ViewQuery::agenda(&patient_id, filter))
        .await?;
    Ok(ok(board))
}
