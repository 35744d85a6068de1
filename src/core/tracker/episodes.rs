use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{Tracker, TrackerError, TrackerResult, cmp_nulls_last, contains_ci};
use crate::core::backend::{Filter, Query, Row, STATUS_HISTORY};
use crate::core::dates;
use crate::core::models::{
    Episode, EpisodePatch, EpisodeType, NewEpisode, NewStatusHistory, StatusHistory, from_row,
    to_row,
};
use crate::core::pipeline::{Deployment, Transition};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EpisodeFilter {
    #[serde(default)]
    pub season: Option<i64>,
    #[serde(default)]
    pub episode_type: Option<EpisodeType>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub overdue_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeSortField {
    #[default]
    EpisodeId,
    Title,
    DueDate,
    CurrentStatus,
    Director,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeSort {
    pub field: EpisodeSortField,
    pub ascending: bool,
}

impl Default for EpisodeSort {
    fn default() -> Self {
        Self {
            field: EpisodeSortField::EpisodeId,
            ascending: true,
        }
    }
}

/// Applies the list filters and sort in memory.
pub fn filter_episodes(
    mut episodes: Vec<Episode>,
    filter: &EpisodeFilter,
    sort: EpisodeSort,
    deployment: &Deployment,
    today: NaiveDate,
) -> Vec<Episode> {
    let director = filter
        .director
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_lowercase);
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let delivered = deployment.delivered_stage();

    episodes.retain(|ep| {
        if filter.season.is_some_and(|s| s != ep.season) {
            return false;
        }
        if filter.episode_type.is_some_and(|t| t != ep.episode_type) {
            return false;
        }
        if let Some(status) = filter.status.as_deref()
            && !status.is_empty()
            && status != ep.current_status
        {
            return false;
        }
        if let Some(director) = &director
            && !contains_ci(ep.director.as_deref(), director)
        {
            return false;
        }
        if let Some(search) = &search {
            let hit = contains_ci(Some(&ep.title), search)
                || contains_ci(Some(&ep.episode_id), search)
                || contains_ci(ep.guest_name.as_deref(), search)
                || contains_ci(ep.director.as_deref(), search);
            if !hit {
                return false;
            }
        }
        !filter.overdue_only || ep.is_overdue(today, delivered)
    });

    let asc = sort.ascending;
    episodes.sort_by(|a, b| {
        let primary = match sort.field {
            EpisodeSortField::EpisodeId => {
                cmp_nulls_last(Some(&a.episode_id), Some(&b.episode_id), asc)
            }
            EpisodeSortField::Title => cmp_nulls_last(Some(&a.title), Some(&b.title), asc),
            EpisodeSortField::DueDate => cmp_nulls_last(a.due(), b.due(), asc),
            EpisodeSortField::CurrentStatus => cmp_nulls_last(
                deployment.stage_index(&a.current_status),
                deployment.stage_index(&b.current_status),
                asc,
            ),
            EpisodeSortField::Director => {
                cmp_nulls_last(a.director.as_ref(), b.director.as_ref(), asc)
            }
        };
        primary.then_with(|| a.episode_id.cmp(&b.episode_id))
    });
    episodes
}

/// Result of a guarded status move.
#[derive(Debug, Clone, Serialize)]
pub struct StatusOutcome {
    pub episode: Episode,
    pub transition: Transition,
    pub history: Option<StatusHistory>,
    /// Set when the status was saved but its history row was not.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanColumn<T> {
    pub status: String,
    pub color: Option<String>,
    pub count: usize,
    pub items: Vec<T>,
}

impl Tracker {
    pub async fn list_episodes(
        &self,
        filter: &EpisodeFilter,
        sort: EpisodeSort,
    ) -> TrackerResult<Vec<Episode>> {
        let mut query = Query::new();
        if let Some(season) = filter.season {
            query = query.eq("season", season);
        }
        if let Some(kind) = filter.episode_type {
            query = query.eq("episode_type", kind.to_string());
        }
        let episodes: Vec<Episode> = self.fetch_all(self.episode_table(), query).await?;
        Ok(filter_episodes(
            episodes,
            filter,
            sort,
            self.deployment(),
            dates::today_jst(),
        ))
    }

    pub async fn get_episode(&self, id: i64) -> TrackerResult<Episode> {
        self.fetch_one(self.episode_table(), "episode", id).await
    }

    pub async fn create_episode(&self, new: NewEpisode) -> TrackerResult<Episode> {
        let new = new.normalize(self.deployment())?;
        let rows = self
            .backend
            .insert(self.episode_table(), vec![to_row(&new)?])
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| TrackerError::NotFound {
            entity: "episode",
            id: new.episode_id.clone(),
        })?;
        let episode: Episode = from_row(row)?;
        info!("Created episode {} ({})", episode.episode_id, episode.id);
        Ok(episode)
    }

    pub async fn update_episode(&self, id: i64, patch: EpisodePatch) -> TrackerResult<Episode> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_episode(id).await;
        }
        self.patch_one(self.episode_table(), "episode", id, to_row(&patch)?)
            .await
    }

    pub async fn delete_episode(&self, id: i64) -> TrackerResult<()> {
        self.delete_one(self.episode_table(), "episode", id).await
    }

    /// Guard, update, then append history. The history insert is not
    /// transactional with the update; its failure becomes a warning.
    pub async fn update_episode_status(
        &self,
        id: i64,
        target: &str,
        reason: Option<&str>,
        changed_by: Option<&str>,
    ) -> TrackerResult<StatusOutcome> {
        let current = self.get_episode(id).await?;
        let transition =
            self.deployment()
                .check_transition(&current.current_status, target, reason)?;
        if transition == Transition::Same {
            return Ok(StatusOutcome {
                episode: current,
                transition,
                history: None,
                warning: None,
            });
        }

        let mut patch = Row::new();
        patch.insert("current_status".into(), Value::from(target));
        let episode: Episode = self
            .patch_one(self.episode_table(), "episode", id, patch)
            .await?;

        let entry = NewStatusHistory {
            episode_id: id,
            old_status: Some(current.current_status.clone()),
            new_status: target.to_string(),
            changed_by: changed_by.map(str::to_string),
            change_reason: match transition {
                Transition::Rollback => reason.map(|r| r.trim().to_string()),
                _ => None,
            },
        };
        let (history, warning) = match self
            .backend
            .insert(STATUS_HISTORY, vec![to_row(&entry)?])
            .await
        {
            Ok(rows) => (
                rows.into_iter()
                    .next()
                    .and_then(|row| from_row::<StatusHistory>(row).ok()),
                None,
            ),
            Err(e) => {
                warn!(
                    "Status of episode {} changed but history was not recorded: {}",
                    id, e
                );
                (None, Some(format!("ステータス履歴の記録に失敗しました: {}", e)))
            }
        };
        info!(
            "Episode {} moved {} → {}",
            episode.episode_id, current.current_status, target
        );
        Ok(StatusOutcome {
            episode,
            transition,
            history,
            warning,
        })
    }

    /// Newest first.
    pub async fn status_history(&self, episode_id: i64) -> TrackerResult<Vec<StatusHistory>> {
        let mut rows: Vec<StatusHistory> = self
            .fetch_all(
                STATUS_HISTORY,
                Query::new()
                    .filter(Filter::eq("episode_id", episode_id))
                    .order_by("changed_at", false),
            )
            .await?;
        rows.sort_by(|a, b| b.changed_at.cmp(&a.changed_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    pub async fn overdue_episodes(&self) -> TrackerResult<Vec<Episode>> {
        let filter = EpisodeFilter {
            overdue_only: true,
            ..Default::default()
        };
        self.list_episodes(
            &filter,
            EpisodeSort {
                field: EpisodeSortField::DueDate,
                ascending: true,
            },
        )
        .await
    }

    pub async fn episode_kanban(&self) -> TrackerResult<Vec<KanbanColumn<Episode>>> {
        let episodes = self
            .list_episodes(&EpisodeFilter::default(), EpisodeSort::default())
            .await?;
        let deployment = self.deployment();
        Ok(deployment
            .stages
            .iter()
            .map(|stage| {
                let items: Vec<Episode> = episodes
                    .iter()
                    .filter(|e| &e.current_status == stage)
                    .cloned()
                    .collect();
                KanbanColumn {
                    status: stage.clone(),
                    color: deployment.color(stage).map(str::to_string),
                    count: items.len(),
                    items,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{Backend, BackendError, ChangeFeed, LocalBackend, schema};
    use crate::core::pipeline::TransitionError;
    use crate::core::tracker::test_support::tracker;
    use async_trait::async_trait;
    use std::sync::Arc;
    use serde_json::json;

    fn new_episode(code: &str, status: &str) -> NewEpisode {
        serde_json::from_value(json!({
            "episode_id": code,
            "title": format!("{} のタイトル", code),
            "episode_type": "interview",
            "season": 1,
            "episode_number": 1,
            "current_status": status,
        }))
        .unwrap()
    }

    fn episode(code: &str, status: &str, due: Option<&str>, director: Option<&str>) -> Episode {
        serde_json::from_value(json!({
            "id": 1,
            "episode_id": code,
            "title": "t",
            "episode_type": "vtr",
            "season": 1,
            "episode_number": 1,
            "current_status": status,
            "due_date": due,
            "director": director,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn rollback_with_reason_writes_one_history_row() {
        let tracker = tracker("pmlibrary");
        let ep = tracker
            .create_episode(new_episode("LA-INT001", "初稿完成"))
            .await
            .unwrap();

        let outcome = tracker
            .update_episode_status(ep.id, "修正1", Some("テロップ修正"), Some("staff@example.com"))
            .await
            .unwrap();
        assert_eq!(outcome.transition, Transition::Rollback);
        assert_eq!(outcome.episode.current_status, "修正1");
        assert!(outcome.warning.is_none());

        let history = tracker.status_history(ep.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status.as_deref(), Some("初稿完成"));
        assert_eq!(history[0].new_status, "修正1");
        assert_eq!(history[0].change_reason.as_deref(), Some("テロップ修正"));
    }

    #[tokio::test]
    async fn rejected_moves_write_nothing() {
        let tracker = tracker("pmlibrary");
        let ep = tracker
            .create_episode(new_episode("LA-INT002", "初稿完成"))
            .await
            .unwrap();

        let err = tracker
            .update_episode_status(ep.id, "素材準備", Some("やり直し"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Transition(TransitionError::RollbackNotAllowed { .. })
        ));

        let err = tracker
            .update_episode_status(ep.id, "修正1", Some("   "), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Transition(TransitionError::ReasonRequired { .. })
        ));

        assert_eq!(tracker.get_episode(ep.id).await.unwrap().current_status, "初稿完成");
        assert!(tracker.status_history(ep.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forward_move_records_history_without_reason_and_same_is_noop() {
        let tracker = tracker("pmplatto");
        let ep = tracker
            .create_episode(new_episode("PL-VTR001", "編集中"))
            .await
            .unwrap();
        let outcome = tracker
            .update_episode_status(ep.id, "完パケ納品", Some("ignored"), None)
            .await
            .unwrap();
        assert_eq!(outcome.transition, Transition::Forward);
        assert_eq!(outcome.history.unwrap().change_reason, None);

        let same = tracker
            .update_episode_status(ep.id, "完パケ納品", None, None)
            .await
            .unwrap();
        assert_eq!(same.transition, Transition::Same);
        assert!(same.history.is_none());
        assert_eq!(tracker.status_history(ep.id).await.unwrap().len(), 1);
    }

    /// Local store whose history table rejects every insert.
    struct HistoryOffline(LocalBackend);

    #[async_trait]
    impl Backend for HistoryOffline {
        fn name(&self) -> &'static str {
            "history-offline"
        }
        async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
            self.0.select(table, query).await
        }
        async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
            if table == STATUS_HISTORY {
                return Err(BackendError::Http {
                    status: 503,
                    message: "status_history unavailable".into(),
                });
            }
            self.0.insert(table, rows).await
        }
        async fn update(
            &self,
            table: &str,
            filters: &[Filter],
            patch: Row,
        ) -> Result<Vec<Row>, BackendError> {
            self.0.update(table, filters, patch).await
        }
        async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
            self.0.delete(table, filters).await
        }
        async fn upsert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
            self.0.upsert(table, rows).await
        }
        async fn subscribe(&self, table: &str) -> Result<ChangeFeed, BackendError> {
            self.0.subscribe(table).await
        }
    }

    #[tokio::test]
    async fn history_failure_keeps_status_and_warns() {
        let deployment = Deployment::preset("pmlibrary").unwrap();
        let local = LocalBackend::in_memory(schema(&deployment.episode_table)).unwrap();
        let tracker = Tracker::new(Arc::new(HistoryOffline(local)), Arc::new(deployment));
        let ep = tracker
            .create_episode(new_episode("LA-INT010", "初稿完成"))
            .await
            .unwrap();

        let outcome = tracker
            .update_episode_status(ep.id, "修正1", Some("テロップ差し替え"), Some("staff@example.com"))
            .await
            .unwrap();
        assert_eq!(outcome.transition, Transition::Rollback);
        assert_eq!(outcome.episode.current_status, "修正1");
        assert!(outcome.history.is_none());
        assert!(outcome.warning.as_deref().unwrap().contains("status_history unavailable"));

        assert_eq!(tracker.get_episode(ep.id).await.unwrap().current_status, "修正1");
        assert!(tracker.status_history(ep.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generic_update_refuses_status_and_missing_rows() {
        let tracker = tracker("pmlibrary");
        let ep = tracker
            .create_episode(new_episode("LA-INT003", "台本作成中"))
            .await
            .unwrap();
        let patch: EpisodePatch =
            serde_json::from_value(json!({"current_status": "完パケ納品"})).unwrap();
        assert!(matches!(
            tracker.update_episode(ep.id, patch).await,
            Err(TrackerError::Validation(_))
        ));

        let patch: EpisodePatch = serde_json::from_value(json!({"director": "佐藤"})).unwrap();
        let updated = tracker.update_episode(ep.id, patch).await.unwrap();
        assert_eq!(updated.director.as_deref(), Some("佐藤"));

        assert!(matches!(
            tracker.get_episode(999).await,
            Err(TrackerError::NotFound { .. })
        ));
        assert!(matches!(
            tracker.delete_episode(999).await,
            Err(TrackerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn kanban_has_one_column_per_stage() {
        let tracker = tracker("pmlibrary");
        tracker
            .create_episode(new_episode("LA-INT004", "MA中"))
            .await
            .unwrap();
        let columns = tracker.episode_kanban().await.unwrap();
        assert_eq!(columns.len(), 10);
        let ma = columns.iter().find(|c| c.status == "MA中").unwrap();
        assert_eq!(ma.count, 1);
        assert!(ma.color.is_some());
    }

    #[test]
    fn filters_search_director_and_overdue() {
        let deployment = Deployment::preset("pmlibrary").unwrap();
        let today = dates::parse_date("2024-04-10").unwrap();
        let episodes = vec![
            episode("LA-INT002", "編集中", Some("2024-04-01"), Some("Yamada")),
            episode("LA-INT001", "完パケ納品", Some("2024-04-01"), None),
            episode("LA-VTR003", "MA中", None, Some("佐藤")),
        ];

        let overdue = filter_episodes(
            episodes.clone(),
            &EpisodeFilter {
                overdue_only: true,
                ..Default::default()
            },
            EpisodeSort::default(),
            &deployment,
            today,
        );
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].episode_id, "LA-INT002");

        let by_director = filter_episodes(
            episodes.clone(),
            &EpisodeFilter {
                director: Some("yama".into()),
                ..Default::default()
            },
            EpisodeSort::default(),
            &deployment,
            today,
        );
        assert_eq!(by_director.len(), 1);

        let search = filter_episodes(
            episodes,
            &EpisodeFilter {
                search: Some("vtr".into()),
                ..Default::default()
            },
            EpisodeSort::default(),
            &deployment,
            today,
        );
        assert_eq!(search[0].episode_id, "LA-VTR003");
    }

    #[test]
    fn sorts_by_stage_and_due_date_with_nulls_last() {
        let deployment = Deployment::preset("pmlibrary").unwrap();
        let today = dates::parse_date("2024-04-10").unwrap();
        let episodes = vec![
            episode("A", "MA中", None, None),
            episode("B", "素材準備", Some("2024-05-01"), None),
            episode("C", "完パケ納品", Some("2024-04-01"), None),
        ];
        let by_stage = filter_episodes(
            episodes.clone(),
            &EpisodeFilter::default(),
            EpisodeSort {
                field: EpisodeSortField::CurrentStatus,
                ascending: true,
            },
            &deployment,
            today,
        );
        let codes: Vec<_> = by_stage.iter().map(|e| e.episode_id.as_str()).collect();
        assert_eq!(codes, vec!["B", "A", "C"]);

        let by_due_desc = filter_episodes(
            episodes,
            &EpisodeFilter::default(),
            EpisodeSort {
                field: EpisodeSortField::DueDate,
                ascending: false,
            },
            &deployment,
            today,
        );
        let codes: Vec<_> = by_due_desc.iter().map(|e| e.episode_id.as_str()).collect();
        assert_eq!(codes, vec!["B", "C", "A"]);
    }
}
