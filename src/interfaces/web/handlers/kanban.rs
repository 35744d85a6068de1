use axum::extract::State;
use serde_json::json;

use super::super::AppState;
use super::{ApiResult, ok};

pub async fn episode_board(State(state): State<AppState>) -> ApiResult {
    let columns = state.tracker.episode_kanban().await?;
    let total: usize = columns.iter().map(|c| c.count).sum();
    ok("board", json!({ "total": total, "columns": columns }))
}

pub async fn program_board(State(state): State<AppState>) -> ApiResult {
    let columns = state.tracker.program_kanban().await?;
    let total: usize = columns.iter().map(|c| c.count).sum();
    ok("board", json!({ "total": total, "columns": columns }))
}
