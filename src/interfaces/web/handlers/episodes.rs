use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiResult, done, ok};
use crate::core::backend::AuthUser;
use crate::core::models::{EpisodePatch, EpisodeType, NewEpisode};
use crate::core::tracker::{EpisodeFilter, EpisodeSort, EpisodeSortField};

#[derive(Deserialize, Default)]
pub struct ListParams {
    season: Option<i64>,
    episode_type: Option<EpisodeType>,
    status: Option<String>,
    director: Option<String>,
    search: Option<String>,
    #[serde(default)]
    overdue: bool,
    sort: Option<EpisodeSortField>,
    #[serde(default)]
    desc: bool,
}

pub async fn list_episodes(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let filter = EpisodeFilter {
        season: params.season,
        episode_type: params.episode_type,
        status: params.status,
        director: params.director,
        search: params.search,
        overdue_only: params.overdue,
    };
    let sort = EpisodeSort {
        field: params.sort.unwrap_or_default(),
        ascending: !params.desc,
    };
    ok("episodes", state.tracker.list_episodes(&filter, sort).await?)
}

pub async fn create_episode(
    State(state): State<AppState>,
    Json(new): Json<NewEpisode>,
) -> ApiResult {
    ok("episode", state.tracker.create_episode(new).await?)
}

pub async fn overdue_episodes(State(state): State<AppState>) -> ApiResult {
    ok("episodes", state.tracker.overdue_episodes().await?)
}

pub async fn get_episode(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult {
    ok("episode", state.tracker.get_episode(id).await?)
}

pub async fn update_episode(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(patch): Json<EpisodePatch>,
) -> ApiResult {
    ok("episode", state.tracker.update_episode(id, patch).await?)
}

pub async fn delete_episode(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult {
    state.tracker.delete_episode(id).await?;
    done()
}

#[derive(Deserialize)]
pub struct StatusRequest {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Guarded move. `changed_by` is the signed-in user's email.
pub async fn update_episode_status(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<StatusRequest>,
) -> ApiResult {
    let changed_by = user.email.as_deref().unwrap_or(user.id.as_str());
    let outcome = state
        .tracker
        .update_episode_status(id, req.status.trim(), req.reason.as_deref(), Some(changed_by))
        .await?;
    ok("outcome", outcome)
}

pub async fn episode_history(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult {
    ok("history", state.tracker.status_history(id).await?)
}
