use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::engine::stats::Statistics;
use crate::error::ApiError;
use crate::models::AppState;
use crate::routes::{ok, parse_optional_day, ApiOk};

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/statistics", get(statistics))
}

pub async fn statistics(
    State(state): State<AppState>,
    Query(q): Query<StatisticsQuery>,
) -> Result<Json<ApiOk<Statistics>>, ApiError> {
    let from = parse_optional_day("from", q.from.as_deref())?;
    let to = parse_optional_day("to", q.to.as_deref())?;
    Ok(ok(state.engine.statistics(from, to).await?))
}
