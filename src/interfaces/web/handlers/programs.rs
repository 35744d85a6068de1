use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiError, ApiResult, done, ok};
use crate::core::dates;
use crate::core::models::{NewProgram, ProgramPatch};
use crate::core::tracker::{PrStatus, ProgramFilter, ProgramSort, ProgramSortField};

const NEARBY_DEFAULT: usize = 10;

#[derive(Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    show_past: bool,
    status: Option<String>,
    pr_status: Option<PrStatus>,
    month: Option<String>,
    sort: Option<ProgramSortField>,
    #[serde(default)]
    desc: bool,
}

pub async fn list_programs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let filter = ProgramFilter {
        show_past: params.show_past,
        status: params.status,
        pr_status: params.pr_status,
        month: params.month,
    };
    let sort = ProgramSort {
        field: params.sort.unwrap_or_default(),
        ascending: !params.desc,
    };
    let programs = state.tracker.list_programs(&filter, sort).await?;
    ok("programs", programs)
}

pub async fn create_program(
    State(state): State<AppState>,
    Json(new): Json<NewProgram>,
) -> ApiResult {
    ok("program", state.tracker.create_program(new).await?)
}

pub async fn get_program(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult {
    ok("program", state.tracker.get_program(id).await?)
}

pub async fn update_program(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(patch): Json<ProgramPatch>,
) -> ApiResult {
    ok("program", state.tracker.update_program(id, patch).await?)
}

pub async fn delete_program(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult {
    state.tracker.delete_program(id).await?;
    done()
}

#[derive(Deserialize)]
pub struct StatusRequest {
    status: String,
}

pub async fn set_program_status(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(req): Json<StatusRequest>,
) -> ApiResult {
    ok(
        "program",
        state.tracker.set_program_status(id, req.status.trim()).await?,
    )
}

#[derive(Deserialize)]
pub struct NearbyParams {
    date: Option<String>,
    limit: Option<usize>,
}

pub async fn nearby_programs(
    State(state): State<AppState>,
    Query(params): Query<NearbyParams>,
) -> ApiResult {
    let date = match params.date.as_deref() {
        Some(raw) => dates::parse_date(raw)
            .ok_or_else(|| ApiError::bad_request(format!("invalid date '{}'", raw)))?,
        None => dates::today_jst(),
    };
    let limit = params.limit.unwrap_or(NEARBY_DEFAULT);
    ok(
        "programs",
        state.tracker.nearby_programs(date, limit).await?,
    )
}
