mod delivery;
mod email;
pub mod job;
mod slack;

pub use delivery::{DeliveryChannel, ResendEmail, ReviewRun, ReviewService, SlackWebhook};
pub use email::{email_html, email_subject};
pub use slack::slack_message;

use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;

use crate::core::backend::{CALENDAR_TASKS, Filter, PROGRAMS, Query, STATUS_HISTORY};
use crate::core::dates::{self, WeekWindow};
use crate::core::models::{CalendarTask, Episode, Program, StatusHistory};
use crate::core::pipeline::Deployment;
use crate::core::tracker::{Tracker, TrackerResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedProgram {
    pub date: String,
    pub program: Program,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramRef {
    pub id: i64,
    pub program_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub date: String,
    pub task: CalendarTask,
    pub program: Option<ProgramRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub episode_id: i64,
    pub episode_code: Option<String>,
    pub title: Option<String>,
    pub old_status: Option<String>,
    pub new_status: String,
    pub change_reason: Option<String>,
    pub changed_at: Option<String>,
}

/// Everything the weekly digest reports for one Monday-start week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReview {
    pub window: WeekWindow,
    pub broadcasts: Vec<DatedProgram>,
    pub recordings: Vec<DatedProgram>,
    pub tasks: Vec<ScheduledTask>,
    pub status_summary: Vec<StatusCount>,
    pub new_programs: Vec<Program>,
    pub status_changes: Vec<StatusChange>,
}

fn dated(programs: &[Program], window: &WeekWindow, pick: fn(&Program) -> Option<&String>) -> Vec<DatedProgram> {
    let mut out: Vec<DatedProgram> = programs
        .iter()
        .filter_map(|p| {
            let raw = pick(p)?;
            let day = dates::parse_date(raw)?;
            window.contains(day).then(|| DatedProgram {
                date: dates::format_date(day),
                program: p.clone(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.date.cmp(&b.date));
    out
}

impl WeeklyReview {
    pub fn build(
        window: WeekWindow,
        programs: &[Program],
        tasks: &[CalendarTask],
        episodes: &[Episode],
        history: &[StatusHistory],
        deployment: &Deployment,
    ) -> Self {
        let broadcasts = dated(programs, &window, |p| p.first_air_date.as_ref());
        let recordings = dated(programs, &window, |p| p.filming_date.as_ref());

        let by_id: HashMap<i64, &Program> = programs.iter().map(|p| (p.id, p)).collect();
        let mut scheduled: Vec<ScheduledTask> = tasks
            .iter()
            .filter(|t| {
                matches!((t.start(), t.end()), (Some(s), Some(e)) if s >= window.start && e <= window.end)
            })
            .map(|t| ScheduledTask {
                date: t.start_date.clone(),
                program: t.program_id.and_then(|id| by_id.get(&id)).map(|p| ProgramRef {
                    id: p.id,
                    program_id: p.program_id.clone(),
                    title: p.title.clone(),
                }),
                task: t.clone(),
            })
            .collect();
        scheduled.sort_by(|a, b| a.date.cmp(&b.date));

        let mut counts: Vec<StatusCount> = Vec::new();
        for p in programs {
            match counts.iter_mut().find(|c| c.status == p.status) {
                Some(c) => c.count += 1,
                None => counts.push(StatusCount {
                    status: p.status.clone(),
                    count: 1,
                }),
            }
        }
        counts.sort_by_key(|c| deployment.program_stage_index(&c.status).unwrap_or(usize::MAX));

        let recent = |ts: Option<&String>| {
            ts.and_then(|raw| dates::jst_date_of(raw))
                .is_some_and(|day| window.contains_recent(day))
        };
        let new_programs = programs
            .iter()
            .filter(|p| recent(p.created_at.as_ref()))
            .cloned()
            .collect();

        let episodes_by_id: HashMap<i64, &Episode> = episodes.iter().map(|e| (e.id, e)).collect();
        let mut status_changes: Vec<StatusChange> = history
            .iter()
            .filter(|h| recent(h.changed_at.as_ref()))
            .map(|h| {
                let episode = episodes_by_id.get(&h.episode_id);
                StatusChange {
                    episode_id: h.episode_id,
                    episode_code: episode.map(|e| e.episode_id.clone()),
                    title: episode.map(|e| e.title.clone()),
                    old_status: h.old_status.clone(),
                    new_status: h.new_status.clone(),
                    change_reason: h.change_reason.clone(),
                    changed_at: h.changed_at.clone(),
                }
            })
            .collect();
        status_changes.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));

        Self {
            window,
            broadcasts,
            recordings,
            tasks: scheduled,
            status_summary: counts,
            new_programs,
            status_changes,
        }
    }

    pub fn has_schedule(&self) -> bool {
        !(self.broadcasts.is_empty() && self.recordings.is_empty() && self.tasks.is_empty())
    }
}

impl Tracker {
    pub async fn weekly_review(&self, window: WeekWindow) -> TrackerResult<WeeklyReview> {
        let backend = self.backend();
        let programs: Vec<Program> = crate::core::models::from_rows(
            backend.select(PROGRAMS, &Query::new()).await?,
        )?;
        let tasks: Vec<CalendarTask> = crate::core::models::from_rows(
            backend
                .select(
                    CALENDAR_TASKS,
                    &Query::new()
                        .filter(Filter::gte("start_date", dates::format_date(window.start)))
                        .filter(Filter::lte("end_date", dates::format_date(window.end))),
                )
                .await?,
        )?;
        // Timestamps are UTC; the extra day covers the JST offset.
        let since = dates::format_date(window.last_week_start - Duration::days(1));
        let history: Vec<StatusHistory> = crate::core::models::from_rows(
            backend
                .select(
                    STATUS_HISTORY,
                    &Query::new().filter(Filter::gte("changed_at", since)),
                )
                .await?,
        )?;
        let episodes: Vec<Episode> = if history.is_empty() {
            Vec::new()
        } else {
            crate::core::models::from_rows(
                backend.select(self.episode_table(), &Query::new()).await?,
            )?
        };
        Ok(WeeklyReview::build(
            window,
            &programs,
            &tasks,
            &episodes,
            &history,
            self.deployment(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn window() -> WeekWindow {
        WeekWindow::containing(dates::parse_date("2024-04-10").unwrap())
    }

    pub fn program(id: i64, code: &str, status: &str, air: Option<&str>, filming: Option<&str>, created: &str) -> Program {
        serde_json::from_value(json!({
            "id": id,
            "program_id": code,
            "title": format!("番組<{}>", id),
            "status": status,
            "first_air_date": air,
            "filming_date": filming,
            "created_at": created,
        }))
        .unwrap()
    }

    pub fn task(id: &str, program: Option<i64>, start: &str, end: &str) -> CalendarTask {
        serde_json::from_value(json!({
            "id": id,
            "program_id": program,
            "task_type": "編集",
            "start_date": start,
            "end_date": end,
        }))
        .unwrap()
    }

    pub fn busy_review() -> WeeklyReview {
        let deployment = Deployment::preset("pmlibrary").unwrap();
        let programs = vec![
            program(1, "P001", "編集中", Some("2024-04-12"), None, "2024-03-01T00:00:00Z"),
            program(2, "P002", "日程調整中", Some("2024-05-01"), Some("2024-04-09"), "2024-04-02T01:00:00Z"),
            program(3, "P003", "編集中", None, None, "2024-03-31T16:00:00Z"),
        ];
        let tasks = vec![
            task("t2", Some(1), "2024-04-11", "2024-04-11"),
            task("t1", None, "2024-04-08", "2024-04-09"),
            task("spill", None, "2024-04-14", "2024-04-16"),
        ];
        let episodes: Vec<Episode> = vec![serde_json::from_value(json!({
            "id": 7, "episode_id": "LA-INT007", "title": "対談", "episode_type": "interview",
            "season": 1, "episode_number": 7, "current_status": "修正1"
        }))
        .unwrap()];
        let history: Vec<StatusHistory> = vec![
            serde_json::from_value(json!({
                "id": 1, "episode_id": 7, "old_status": "初稿完成", "new_status": "修正1",
                "change_reason": "テロップ", "changed_at": "2024-04-09T03:00:00Z"
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "id": 2, "episode_id": 7, "old_status": "台本作成中", "new_status": "素材準備",
                "changed_at": "2024-03-20T03:00:00Z"
            }))
            .unwrap(),
        ];
        WeeklyReview::build(window(), &programs, &tasks, &episodes, &history, &deployment)
    }

    pub fn empty_review() -> WeeklyReview {
        let deployment = Deployment::preset("pmlibrary").unwrap();
        WeeklyReview::build(window(), &[], &[], &[], &[], &deployment)
    }
}
