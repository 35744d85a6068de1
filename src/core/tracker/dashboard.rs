use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use super::{Tracker, TrackerError, TrackerResult};
use crate::core::backend::{Query, Row, TEAM_DASHBOARD};
use crate::core::dates::{self, WeekWindow};
use crate::core::models::{
    CalendarTask, DashboardWidget, NewWidget, WidgetKind, WidgetPatch, from_row, to_row,
};

const SCHEDULE_LIMIT: usize = 5;

/// Active widgets plus the rows the schedule widget renders.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub widgets: Vec<DashboardWidget>,
    pub schedule: Vec<CalendarTask>,
}

/// Tasks starting in the Monday-start week containing `today`.
pub fn week_schedule(mut tasks: Vec<CalendarTask>, today: NaiveDate) -> Vec<CalendarTask> {
    let week = WeekWindow::containing(today);
    tasks.retain(|t| t.start().is_some_and(|start| week.contains(start)));
    tasks.sort_by(|a, b| a.start_date.cmp(&b.start_date));
    tasks.truncate(SCHEDULE_LIMIT);
    tasks
}

impl Tracker {
    pub async fn list_widgets(&self) -> TrackerResult<Vec<DashboardWidget>> {
        self.fetch_all(
            TEAM_DASHBOARD,
            Query::new()
                .eq("is_active", true)
                .order_by("sort_order", true),
        )
        .await
    }

    pub async fn dashboard(&self) -> TrackerResult<DashboardView> {
        let widgets = self.list_widgets().await?;
        let schedule = if widgets.iter().any(|w| w.widget_type == WidgetKind::Schedule) {
            week_schedule(self.list_tasks().await?, dates::today_jst())
        } else {
            Vec::new()
        };
        Ok(DashboardView { widgets, schedule })
    }

    /// New widgets go to the end unless a position is given.
    pub async fn create_widget(&self, new: NewWidget) -> TrackerResult<DashboardWidget> {
        let mut new = new.normalize()?;
        if new.sort_order.is_none() {
            let last = self
                .backend
                .select(
                    TEAM_DASHBOARD,
                    &Query::new().order_by("sort_order", false).limit(1),
                )
                .await?;
            let next = last
                .first()
                .and_then(|row| row.get("sort_order"))
                .and_then(Value::as_i64)
                .map_or(0, |n| n + 1);
            new.sort_order = Some(next);
        }
        let mut row = to_row(&new)?;
        row.insert("is_active".into(), Value::Bool(true));
        let rows = self.backend.insert(TEAM_DASHBOARD, vec![row]).await?;
        let row = rows.into_iter().next().ok_or_else(|| TrackerError::NotFound {
            entity: "widget",
            id: new.title.clone(),
        })?;
        let widget: DashboardWidget = from_row(row)?;
        info!("Added {:?} widget '{}'", widget.widget_type, widget.title);
        Ok(widget)
    }

    pub async fn update_widget(&self, id: &str, patch: WidgetPatch) -> TrackerResult<DashboardWidget> {
        let current: DashboardWidget = self.fetch_one(TEAM_DASHBOARD, "widget", id).await?;
        let patch = patch.normalize(current.widget_type)?;
        if patch.is_empty() {
            return Ok(current);
        }
        self.patch_one(TEAM_DASHBOARD, "widget", id, to_row(&patch)?)
            .await
    }

    pub async fn delete_widget(&self, id: &str) -> TrackerResult<()> {
        self.delete_one(TEAM_DASHBOARD, "widget", id).await
    }

    /// Rewrites `sort_order` to match the given id order. Every id is
    /// checked before anything is written.
    pub async fn reorder_widgets(&self, ids: &[String]) -> TrackerResult<Vec<DashboardWidget>> {
        let mut by_id: HashMap<String, Row> = self
            .backend
            .select(TEAM_DASHBOARD, &Query::new())
            .await?
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id")?.as_str()?.to_string();
                Some((id, row))
            })
            .collect();
        if let Some(missing) = ids.iter().find(|id| !by_id.contains_key(id.as_str())) {
            return Err(TrackerError::NotFound {
                entity: "widget",
                id: missing.clone(),
            });
        }

        let mut rows = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            if let Some(mut row) = by_id.remove(id) {
                row.insert("sort_order".into(), Value::from(position as i64));
                rows.push(row);
            }
        }
        if !rows.is_empty() {
            self.backend.upsert(TEAM_DASHBOARD, rows).await?;
        }
        info!("Reordered {} widget(s)", ids.len());
        self.list_widgets().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::dashboard::WidgetContent;
    use crate::core::tracker::test_support::tracker;
    use serde_json::json;

    fn new_widget(kind: &str, title: &str, content: Value) -> NewWidget {
        serde_json::from_value(json!({"widget_type": kind, "title": title, "content": content}))
            .unwrap()
    }

    fn task(id: &str, start: &str) -> CalendarTask {
        serde_json::from_value(json!({
            "id": id, "task_type": "編集", "start_date": start, "end_date": start
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn widgets_append_reorder_and_hide() {
        let tracker = tracker("pmlibrary");
        let memo = tracker
            .create_widget(new_widget("memo", "連絡", json!({"text": "来週は休み"})))
            .await
            .unwrap();
        let links = tracker
            .create_widget(new_widget(
                "quicklinks",
                "リンク",
                json!({"links": [{"url": "https://example.com", "label": "台本"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(memo.sort_order, 0);
        assert_eq!(links.sort_order, 1);

        let reordered = tracker
            .reorder_widgets(&[links.id.clone(), memo.id.clone()])
            .await
            .unwrap();
        assert_eq!(reordered[0].id, links.id);

        let hidden = tracker
            .update_widget(
                &memo.id,
                WidgetPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!hidden.is_active);
        assert_eq!(tracker.list_widgets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn content_is_checked_against_stored_kind() {
        let tracker = tracker("pmplatto");
        let tasks = tracker
            .create_widget(new_widget("tasks", "ToDo", Value::Null))
            .await
            .unwrap();
        assert_eq!(
            WidgetContent::parse(tasks.widget_type, tasks.content.clone()).unwrap(),
            WidgetContent::Tasks { tasks: Vec::new() }
        );
        let bad = WidgetPatch {
            content: Some(json!({"tasks": [{"id": "1", "text": ""}]})),
            ..Default::default()
        };
        assert!(matches!(
            tracker.update_widget(&tasks.id, bad).await,
            Err(TrackerError::Validation(_))
        ));
        assert!(
            tracker
                .reorder_widgets(&["nope".to_string()])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn reorder_with_unknown_id_changes_nothing() {
        let tracker = tracker("pmlibrary");
        let first = tracker
            .create_widget(new_widget("memo", "一", json!({"text": "a"})))
            .await
            .unwrap();
        let second = tracker
            .create_widget(new_widget("memo", "二", json!({"text": "b"})))
            .await
            .unwrap();

        let err = tracker
            .reorder_widgets(&[second.id.clone(), "missing".to_string(), first.id.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { entity: "widget", .. }));

        let widgets = tracker.list_widgets().await.unwrap();
        let order: Vec<_> = widgets.iter().map(|w| (w.id.as_str(), w.sort_order)).collect();
        assert_eq!(
            order,
            vec![(first.id.as_str(), 0), (second.id.as_str(), 1)]
        );

        let reordered = tracker
            .reorder_widgets(&[second.id.clone(), first.id.clone()])
            .await
            .unwrap();
        assert_eq!(reordered[0].id, second.id);
        assert_eq!(reordered[0].sort_order, 0);
        assert_eq!(reordered[1].sort_order, 1);
        assert_eq!(reordered[1].title, "一");
    }

    #[test]
    fn schedule_takes_this_weeks_first_five() {
        let today = dates::parse_date("2024-04-10").unwrap();
        let tasks = vec![
            task("sun-before", "2024-04-07"),
            task("f", "2024-04-14"),
            task("a", "2024-04-08"),
            task("c", "2024-04-10"),
            task("b", "2024-04-09"),
            task("d", "2024-04-11"),
            task("e", "2024-04-12"),
            task("next", "2024-04-15"),
        ];
        let schedule = week_schedule(tasks, today);
        let ids: Vec<_> = schedule.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }
}
