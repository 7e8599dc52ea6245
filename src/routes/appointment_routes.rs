// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    engine::{
        merger::{self, SlotSplit},
        reconciler::ToggleOutcome,
        rescheduler::RescheduleOutcome,
        AppointmentBoard, ViewQuery,
    },
    error::ApiError,
    models::AppState,
    routes::{ok, parse_day, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments/day", get(get_day))
        .route("/appointments/day/groups", get(get_day_groups))
        .route("/appointments/range", get(get_range))
        .route(
            "/appointments/{appointment_id}/completion",
            post(set_completion),
        )
        .route(
            "/appointments/{appointment_id}/reschedule",
            post(reschedule),
        )
}

/* ============================================================
   Views
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub async fn get_day(
    State(state): State<AppState>,
    Query(q): Query<DayQuery>,
) -> Result<Json<ApiOk<AppointmentBoard>>, ApiError> {
    let date = parse_day("date", q.date.as_deref())?;
    Ok(ok(state.engine.load_board(ViewQuery::day(date)).await?))
}

pub async fn get_range(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<ApiOk<AppointmentBoard>>, ApiError> {
    let from = parse_day("from", q.from.as_deref())?;
    let to = parse_day("to", q.to.as_deref())?;
    let query = ViewQuery::range(from, to)?;
    Ok(ok(state.engine.load_board(query).await?))
}

pub async fn get_day_groups(
    State(state): State<AppState>,
    Query(q): Query<DayQuery>,
) -> Result<Json<ApiOk<SlotSplit>>, ApiError> {
    let date = parse_day("date", q.date.as_deref())?;
    let board = state.engine.load_board(ViewQuery::day(date)).await?;
    let groups = merger::group_by_slot(&board.items);
    Ok(ok(merger::split_by_completion(groups)))
}

/* ============================================================
   Mutations
   ============================================================ */

/// Result of a mutation plus the board it was applied to.
#[derive(Debug, Serialize)]
pub struct Applied<T> {
    pub outcome: T,
    pub board: AppointmentBoard,
}

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub completed: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn set_completion(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<ApiOk<Applied<ToggleOutcome>>>, ApiError> {
    let mut board = state.engine.board_for_item(&appointment_id).await?;
    let outcome = state
        .engine
        .toggle_completion(
            &mut board,
            &appointment_id,
            req.completed,
            req.user_id.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(ok(Applied { outcome, board }))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub new_date: Option<String>,
}

pub async fn reschedule(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<Applied<RescheduleOutcome>>>, ApiError> {
    let new_date = parse_day("new_date", req.new_date.as_deref())?;
    let mut board = state.engine.board_for_item(&appointment_id).await?;
    let outcome = state
        .engine
        .reschedule(&mut board, &appointment_id, new_date)
        .await?;
    Ok(ok(Applied { outcome, board }))
}
