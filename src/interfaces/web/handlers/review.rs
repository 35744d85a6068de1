use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiError, ApiResult, ok};
use crate::core::dates::{self, WeekWindow};

#[derive(Deserialize, Default)]
pub struct RunRequest {
    #[serde(default)]
    dry_run: bool,
    /// Any day inside the week to report on; defaults to today.
    #[serde(default)]
    date: Option<String>,
}

pub async fn run_review(
    State(state): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> ApiResult {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let window = match req.date.as_deref() {
        Some(raw) => WeekWindow::containing(
            dates::parse_date(raw)
                .ok_or_else(|| ApiError::bad_request(format!("invalid date '{}'", raw)))?,
        ),
        None => WeekWindow::current(),
    };
    let run = state
        .review
        .run(window, req.dry_run)
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))?;
    ok("run", run)
}
