use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{Tracker, TrackerError, TrackerResult};
use crate::core::backend::{CALENDAR_TASKS, PROGRAMS, Query, Row};
use crate::core::dates;
use crate::core::models::{
    CalendarTask, CalendarTaskPatch, Episode, EpisodeType, NewCalendarTask, Program,
    ValidationError, from_row, to_row,
};

/// One dated marker on the month grid besides calendar tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DayItem {
    EpisodeDue {
        id: i64,
        episode_id: String,
        title: String,
        status: String,
    },
    Recording {
        id: i64,
        episode_id: String,
        title: String,
        guest_name: Option<String>,
        location: Option<String>,
    },
    Air { id: i64, program_id: String, title: String },
    ReAir { id: i64, program_id: String, title: String },
    Filming { id: i64, program_id: String, title: String },
    Complete { id: i64, program_id: String, title: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDay {
    pub date: String,
    pub in_month: bool,
    pub tasks: Vec<CalendarTask>,
    pub team_events: Vec<CalendarTask>,
    pub items: Vec<DayItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub weeks: Vec<Vec<CalendarDay>>,
}

fn on(raw: Option<&str>, day: NaiveDate) -> bool {
    raw.and_then(dates::parse_date) == Some(day)
}

impl MonthView {
    pub fn build(
        year: i32,
        month: u32,
        tasks: &[CalendarTask],
        episodes: &[Episode],
        programs: &[Program],
    ) -> Option<Self> {
        let grid = dates::month_grid(year, month)?;
        let weeks = grid
            .iter()
            .map(|week| {
                week.iter()
                    .map(|&day| Self::day(year, month, day, tasks, episodes, programs))
                    .collect()
            })
            .collect();
        Some(Self { year, month, weeks })
    }

    fn day(
        year: i32,
        month: u32,
        day: NaiveDate,
        tasks: &[CalendarTask],
        episodes: &[Episode],
        programs: &[Program],
    ) -> CalendarDay {
        let (team_events, tasks): (Vec<_>, Vec<_>) = tasks
            .iter()
            .filter(|t| t.covers(day))
            .cloned()
            .partition(|t| t.is_team_event);

        let mut items = Vec::new();
        for ep in episodes {
            if on(ep.due_date.as_deref(), day) {
                items.push(DayItem::EpisodeDue {
                    id: ep.id,
                    episode_id: ep.episode_id.clone(),
                    title: ep.title.clone(),
                    status: ep.current_status.clone(),
                });
            }
            if ep.episode_type == EpisodeType::Interview && on(ep.recording_date.as_deref(), day) {
                items.push(DayItem::Recording {
                    id: ep.id,
                    episode_id: ep.episode_id.clone(),
                    title: ep.title.clone(),
                    guest_name: ep.guest_name.clone(),
                    location: ep.recording_location.clone(),
                });
            }
        }
        for p in programs {
            let (id, program_id, title) = (p.id, p.program_id.clone(), p.title.clone());
            if on(p.first_air_date.as_deref(), day) {
                items.push(DayItem::Air {
                    id,
                    program_id: program_id.clone(),
                    title: title.clone(),
                });
            }
            if on(p.re_air_date.as_deref(), day) {
                items.push(DayItem::ReAir {
                    id,
                    program_id: program_id.clone(),
                    title: title.clone(),
                });
            }
            if on(p.filming_date.as_deref(), day) {
                items.push(DayItem::Filming {
                    id,
                    program_id: program_id.clone(),
                    title: title.clone(),
                });
            }
            if on(p.complete_date.as_deref(), day) {
                items.push(DayItem::Complete {
                    id,
                    program_id,
                    title,
                });
            }
        }

        CalendarDay {
            date: dates::format_date(day),
            in_month: day.year() == year && day.month() == month,
            tasks,
            team_events,
            items,
        }
    }
}

impl Tracker {
    pub async fn list_tasks(&self) -> TrackerResult<Vec<CalendarTask>> {
        self.fetch_all(CALENDAR_TASKS, Query::new().order_by("start_date", true))
            .await
    }

    pub async fn get_task(&self, id: &str) -> TrackerResult<CalendarTask> {
        self.fetch_one(CALENDAR_TASKS, "calendar task", id).await
    }

    pub async fn create_task(&self, new: NewCalendarTask) -> TrackerResult<CalendarTask> {
        let new = new.normalize()?;
        let rows = self
            .backend
            .insert(CALENDAR_TASKS, vec![to_row(&new)?])
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| TrackerError::NotFound {
            entity: "calendar task",
            id: new.task_type.clone(),
        })?;
        let task: CalendarTask = from_row(row)?;
        info!("Created {} task {} ({})", task.task_type, task.id, task.start_date);
        Ok(task)
    }

    pub async fn update_task(
        &self,
        id: &str,
        patch: CalendarTaskPatch,
    ) -> TrackerResult<CalendarTask> {
        let current = self.get_task(id).await?;
        patch.validate_against(&current)?;
        if patch.is_empty() {
            return Ok(current);
        }
        self.patch_one(CALENDAR_TASKS, "calendar task", id, to_row(&patch)?)
            .await
    }

    pub async fn delete_task(&self, id: &str) -> TrackerResult<()> {
        self.delete_one(CALENDAR_TASKS, "calendar task", id).await
    }

    /// Drag-and-drop move: shifts the task to `new_start`, keeping its span.
    pub async fn move_task(&self, id: &str, new_start: NaiveDate) -> TrackerResult<CalendarTask> {
        let current = self.get_task(id).await?;
        let (Some(start), Some(end)) = (current.start(), current.end()) else {
            return Err(ValidationError::invalid("start_date", "stored task has no valid range").into());
        };
        let new_end = new_start + Duration::days((end - start).num_days());
        let mut patch = Row::new();
        patch.insert("start_date".into(), Value::from(dates::format_date(new_start)));
        patch.insert("end_date".into(), Value::from(dates::format_date(new_end)));
        self.patch_one(CALENDAR_TASKS, "calendar task", id, patch).await
    }

    pub async fn month_view(&self, year: i32, month: u32) -> TrackerResult<MonthView> {
        let tasks = self.list_tasks().await?;
        let episodes: Vec<Episode> = self.fetch_all(self.episode_table(), Query::new()).await?;
        let programs: Vec<Program> = self.fetch_all(PROGRAMS, Query::new()).await?;
        MonthView::build(year, month, &tasks, &episodes, &programs).ok_or_else(|| {
            ValidationError::invalid("month", format!("{}-{} is not a month", year, month)).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::test_support::tracker;
    use serde_json::json;

    fn new_task(task_type: &str, start: &str, end: &str, team: bool) -> NewCalendarTask {
        serde_json::from_value(json!({
            "task_type": task_type,
            "start_date": start,
            "end_date": end,
            "is_team_event": team,
            "meeting_url": "https://meet.example.com/abc",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn move_keeps_span() {
        let tracker = tracker("pmlibrary");
        let task = tracker
            .create_task(new_task("編集", "2024-04-08", "2024-04-10", false))
            .await
            .unwrap();
        assert_eq!(task.meeting_url, None);
        let moved = tracker
            .move_task(&task.id, dates::parse_date("2024-04-15").unwrap())
            .await
            .unwrap();
        assert_eq!(moved.start_date, "2024-04-15");
        assert_eq!(moved.end_date, "2024-04-17");
    }

    #[tokio::test]
    async fn update_rejects_inverted_range_and_unknown_id() {
        let tracker = tracker("pmlibrary");
        let task = tracker
            .create_task(new_task("MA", "2024-04-08", "2024-04-08", false))
            .await
            .unwrap();
        let patch: CalendarTaskPatch =
            serde_json::from_value(json!({"end_date": "2024-04-01"})).unwrap();
        assert!(matches!(
            tracker.update_task(&task.id, patch).await,
            Err(TrackerError::Validation(_))
        ));
        assert!(matches!(
            tracker.delete_task("missing").await,
            Err(TrackerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn month_view_places_tasks_events_and_dates() {
        let tracker = tracker("pmlibrary");
        tracker
            .create_task(new_task("試写", "2024-04-09", "2024-04-10", false))
            .await
            .unwrap();
        tracker
            .create_task(new_task("🌐 全体会議", "2024-04-10", "2024-04-10", true))
            .await
            .unwrap();
        tracker
            .create_program(
                serde_json::from_value(json!({
                    "program_id": "P1", "title": "番組", "first_air_date": "2024-04-10"
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        tracker
            .create_episode(
                serde_json::from_value(json!({
                    "episode_id": "LA-INT001", "title": "対談", "episode_type": "interview",
                    "season": 1, "episode_number": 1,
                    "due_date": "2024-04-10", "recording_date": "2024-04-03"
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let view = tracker.month_view(2024, 4).await.unwrap();
        let days: Vec<&CalendarDay> = view.weeks.iter().flatten().collect();
        assert_eq!(days[0].date, "2024-03-31");
        assert!(!days[0].in_month);

        let apr10 = days.iter().find(|d| d.date == "2024-04-10").unwrap();
        assert_eq!(apr10.tasks.len(), 1);
        assert_eq!(apr10.team_events.len(), 1);
        assert_eq!(
            apr10.team_events[0].meeting_url.as_deref(),
            Some("https://meet.example.com/abc")
        );
        assert!(apr10.items.iter().any(|i| matches!(i, DayItem::Air { .. })));
        assert!(apr10.items.iter().any(|i| matches!(i, DayItem::EpisodeDue { .. })));

        let apr2 = days.iter().find(|d| d.date == "2024-04-02").unwrap();
        assert!(apr2.items.iter().any(|i| matches!(i, DayItem::Complete { .. })));
        let apr3 = days.iter().find(|d| d.date == "2024-04-03").unwrap();
        assert!(apr3.items.iter().any(|i| matches!(i, DayItem::Recording { .. })));

        assert!(tracker.month_view(2024, 13).await.is_err());
    }
}
