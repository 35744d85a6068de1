use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiResult, done, ok};
use crate::core::models::{NewWidget, WidgetPatch};

pub async fn get_dashboard(State(state): State<AppState>) -> ApiResult {
    ok("dashboard", state.tracker.dashboard().await?)
}

pub async fn create_widget(
    State(state): State<AppState>,
    Json(new): Json<NewWidget>,
) -> ApiResult {
    ok("widget", state.tracker.create_widget(new).await?)
}

pub async fn update_widget(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<WidgetPatch>,
) -> ApiResult {
    ok("widget", state.tracker.update_widget(&id, patch).await?)
}

pub async fn delete_widget(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult {
    state.tracker.delete_widget(&id).await?;
    done()
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    ids: Vec<String>,
}

pub async fn reorder_widgets(
    State(state): State<AppState>,
    Json(req): Json<ReorderRequest>,
) -> ApiResult {
    ok("widgets", state.tracker.reorder_widgets(&req.ids).await?)
}
