use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Datelike;
use serde::Deserialize;

use super::super::AppState;
use super::{ApiError, ApiResult, done, ok};
use crate::core::dates;
use crate::core::models::{CalendarTaskPatch, NewCalendarTask};

pub async fn list_tasks(State(state): State<AppState>) -> ApiResult {
    ok("tasks", state.tracker.list_tasks().await?)
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(new): Json<NewCalendarTask>,
) -> ApiResult {
    ok("task", state.tracker.create_task(new).await?)
}

pub async fn update_task(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<CalendarTaskPatch>,
) -> ApiResult {
    ok("task", state.tracker.update_task(&id, patch).await?)
}

pub async fn delete_task(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult {
    state.tracker.delete_task(&id).await?;
    done()
}

#[derive(Deserialize)]
pub struct MoveRequest {
    start_date: String,
}

pub async fn move_task(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> ApiResult {
    let start = dates::parse_date(&req.start_date)
        .ok_or_else(|| ApiError::bad_request(format!("invalid date '{}'", req.start_date)))?;
    ok("task", state.tracker.move_task(&id, start).await?)
}

const YEARS: std::ops::RangeInclusive<i32> = 1900..=9999;

#[derive(Deserialize)]
pub struct MonthParams {
    year: Option<i32>,
    month: Option<u32>,
}

/// Month grid; defaults to the current month in Tokyo.
pub async fn month_view(
    State(state): State<AppState>,
    Query(params): Query<MonthParams>,
) -> ApiResult {
    let today = dates::today_jst();
    let year = params.year.unwrap_or(today.year());
    let month = params.month.unwrap_or(today.month());
    if !YEARS.contains(&year) {
        return Err(ApiError::bad_request(format!(
            "year must be between {} and {}",
            YEARS.start(),
            YEARS.end()
        )));
    }
    ok("calendar", state.tracker.month_view(year, month).await?)
}
