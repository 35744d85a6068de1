use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::episodes::KanbanColumn;
use super::{Tracker, TrackerError, TrackerResult, cmp_nulls_last};
use crate::core::backend::{PROGRAMS, Query, Row};
use crate::core::dates;
use crate::core::models::{NewProgram, Program, ProgramPatch, ValidationError, from_row, to_row};
use crate::core::pipeline::Deployment;

pub type ProgramColumn = KanbanColumn<Program>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrStatus {
    Completed,
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgramFilter {
    #[serde(default)]
    pub show_past: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pr_status: Option<PrStatus>,
    /// `YYYY-MM` prefix of the first air date.
    #[serde(default)]
    pub month: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramSortField {
    #[default]
    Status,
    ProgramId,
    Title,
    FirstAirDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSort {
    pub field: ProgramSortField,
    pub ascending: bool,
}

impl Default for ProgramSort {
    fn default() -> Self {
        Self {
            field: ProgramSortField::Status,
            ascending: true,
        }
    }
}

pub fn filter_programs(
    mut programs: Vec<Program>,
    filter: &ProgramFilter,
    sort: ProgramSort,
    deployment: &Deployment,
    today: NaiveDate,
) -> Vec<Program> {
    let status = filter.status.as_deref().filter(|s| !s.is_empty());
    let month = filter.month.as_deref().map(str::trim).filter(|m| !m.is_empty());

    programs.retain(|p| {
        // The casting stage only shows up when asked for by name.
        if deployment.is_casting(&p.status) && status != Some(p.status.as_str()) {
            return false;
        }
        if !filter.show_past && p.air_date().is_some_and(|air| air < today) {
            return false;
        }
        if status.is_some_and(|s| s != p.status) {
            return false;
        }
        match filter.pr_status {
            Some(PrStatus::Completed) if !p.pr_completed => return false,
            Some(PrStatus::Pending) if p.pr_completed => return false,
            _ => {}
        }
        if let Some(month) = month
            && let Some(air) = p.first_air_date.as_deref()
            && !air.starts_with(month)
        {
            return false;
        }
        true
    });

    let asc = sort.ascending;
    programs.sort_by(|a, b| {
        let primary = match sort.field {
            ProgramSortField::Status => cmp_nulls_last(
                deployment.program_stage_index(&a.status),
                deployment.program_stage_index(&b.status),
                asc,
            )
            .then_with(|| cmp_nulls_last(a.air_date(), b.air_date(), true)),
            ProgramSortField::ProgramId => {
                cmp_nulls_last(Some(a.code_number()), Some(b.code_number()), asc)
                    .then_with(|| cmp_nulls_last(Some(&a.program_id), Some(&b.program_id), asc))
            }
            ProgramSortField::Title => cmp_nulls_last(Some(&a.title), Some(&b.title), asc),
            ProgramSortField::FirstAirDate => cmp_nulls_last(a.air_date(), b.air_date(), asc),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
    programs
}

/// Programs closest to `date` by first air date. Undated programs count as
/// 9999-12-31; ties go to the higher program number.
pub fn nearest_programs(mut programs: Vec<Program>, date: NaiveDate, limit: usize) -> Vec<Program> {
    let far = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX);
    let distance = |p: &Program| (p.air_date().unwrap_or(far) - date).num_days().abs();
    programs.sort_by(|a, b| {
        distance(a)
            .cmp(&distance(b))
            .then_with(|| b.code_number().cmp(&a.code_number()))
    });
    programs.truncate(limit);
    programs
}

impl Tracker {
    pub async fn list_programs(
        &self,
        filter: &ProgramFilter,
        sort: ProgramSort,
    ) -> TrackerResult<Vec<Program>> {
        let programs: Vec<Program> = self.fetch_all(PROGRAMS, Query::new()).await?;
        Ok(filter_programs(
            programs,
            filter,
            sort,
            self.deployment(),
            dates::today_jst(),
        ))
    }

    pub async fn all_programs(&self) -> TrackerResult<Vec<Program>> {
        self.fetch_all(PROGRAMS, Query::new()).await
    }

    pub async fn get_program(&self, id: i64) -> TrackerResult<Program> {
        self.fetch_one(PROGRAMS, "program", id).await
    }

    pub async fn create_program(&self, new: NewProgram) -> TrackerResult<Program> {
        let new = new.normalize(self.deployment())?;
        let rows = self.backend.insert(PROGRAMS, vec![to_row(&new)?]).await?;
        let row = rows.into_iter().next().ok_or_else(|| TrackerError::NotFound {
            entity: "program",
            id: new.program_id.clone(),
        })?;
        let program: Program = from_row(row)?;
        info!("Created program {} ({})", program.program_id, program.id);
        Ok(program)
    }

    pub async fn update_program(&self, id: i64, patch: ProgramPatch) -> TrackerResult<Program> {
        let patch = patch.normalize(self.deployment())?;
        if patch.is_empty() {
            return self.get_program(id).await;
        }
        self.patch_one(PROGRAMS, "program", id, to_row(&patch)?).await
    }

    pub async fn delete_program(&self, id: i64) -> TrackerResult<()> {
        self.delete_one(PROGRAMS, "program", id).await
    }

    /// Programs move freely between stages; only the stage name is checked.
    pub async fn set_program_status(&self, id: i64, status: &str) -> TrackerResult<Program> {
        if !self.deployment().is_program_stage(status) {
            return Err(ValidationError::invalid(
                "status",
                format!("unknown program status '{}'", status),
            )
            .into());
        }
        let mut patch = Row::new();
        patch.insert("status".into(), Value::from(status));
        self.patch_one(PROGRAMS, "program", id, patch).await
    }

    pub async fn nearby_programs(&self, date: NaiveDate, limit: usize) -> TrackerResult<Vec<Program>> {
        let programs = self.all_programs().await?;
        Ok(nearest_programs(programs, date, limit))
    }

    pub async fn program_kanban(&self) -> TrackerResult<Vec<ProgramColumn>> {
        let programs = filter_programs(
            self.all_programs().await?,
            &ProgramFilter {
                show_past: true,
                ..Default::default()
            },
            ProgramSort {
                field: ProgramSortField::FirstAirDate,
                ascending: true,
            },
            self.deployment(),
            dates::today_jst(),
        );
        let deployment = self.deployment();
        Ok(deployment
            .program_stages
            .iter()
            .filter(|stage| !deployment.is_casting(stage))
            .map(|stage| {
                let items: Vec<Program> = programs
                    .iter()
                    .filter(|p| &p.status == stage)
                    .cloned()
                    .collect();
                KanbanColumn {
                    status: stage.clone(),
                    color: None,
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
    use crate::core::tracker::test_support::tracker;
    use serde_json::json;

    fn program(id: i64, code: &str, status: &str, air: Option<&str>, pr: bool) -> Program {
        serde_json::from_value(json!({
            "id": id,
            "program_id": code,
            "title": format!("番組{}", id),
            "status": status,
            "first_air_date": air,
            "pr_completed": pr,
        }))
        .unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        dates::parse_date(s).unwrap()
    }

    fn sample() -> Vec<Program> {
        vec![
            program(1, "P001", "編集中", Some("2024-04-20"), false),
            program(2, "P002", "日程調整中", None, true),
            program(3, "P003", "放送済み", Some("2024-03-01"), true),
            program(4, "P004", "キャスティング中", Some("2024-05-01"), false),
            program(5, "P005", "MA中", Some("2024-05-10"), false),
        ]
    }

    fn ids(programs: &[Program]) -> Vec<i64> {
        programs.iter().map(|p| p.id).collect()
    }

    #[test]
    fn default_list_hides_casting_and_past() {
        let deployment = Deployment::preset("pmplatto").unwrap();
        let listed = filter_programs(
            sample(),
            &ProgramFilter::default(),
            ProgramSort::default(),
            &deployment,
            day("2024-04-10"),
        );
        assert_eq!(ids(&listed), vec![2, 1, 5]);

        let with_past = filter_programs(
            sample(),
            &ProgramFilter {
                show_past: true,
                ..Default::default()
            },
            ProgramSort::default(),
            &deployment,
            day("2024-04-10"),
        );
        assert_eq!(ids(&with_past), vec![2, 1, 5, 3]);
    }

    #[test]
    fn month_and_pr_filters_let_undated_pass_month() {
        let deployment = Deployment::preset("pmplatto").unwrap();
        let may = filter_programs(
            sample(),
            &ProgramFilter {
                month: Some("2024-05".into()),
                ..Default::default()
            },
            ProgramSort::default(),
            &deployment,
            day("2024-04-10"),
        );
        assert_eq!(ids(&may), vec![2, 5]);

        let pending = filter_programs(
            sample(),
            &ProgramFilter {
                pr_status: Some(PrStatus::Pending),
                ..Default::default()
            },
            ProgramSort::default(),
            &deployment,
            day("2024-04-10"),
        );
        assert_eq!(ids(&pending), vec![1, 5]);

        let casting = filter_programs(
            sample(),
            &ProgramFilter {
                status: Some("キャスティング中".into()),
                ..Default::default()
            },
            ProgramSort::default(),
            &deployment,
            day("2024-04-10"),
        );
        assert_eq!(ids(&casting), vec![4]);
    }

    #[test]
    fn air_date_sort_puts_undated_last_descending_too() {
        let deployment = Deployment::preset("pmplatto").unwrap();
        let listed = filter_programs(
            sample(),
            &ProgramFilter::default(),
            ProgramSort {
                field: ProgramSortField::FirstAirDate,
                ascending: false,
            },
            &deployment,
            day("2024-04-10"),
        );
        assert_eq!(ids(&listed), vec![5, 1, 2]);
    }

    #[test]
    fn nearby_orders_by_distance_then_higher_number() {
        let programs = vec![
            program(1, "P001", "編集中", Some("2024-04-12"), false),
            program(2, "P002", "編集中", Some("2024-04-08"), false),
            program(3, "P003", "編集中", None, false),
            program(4, "P004", "編集中", Some("2024-04-30"), false),
        ];
        let near = nearest_programs(programs, day("2024-04-10"), 3);
        assert_eq!(ids(&near), vec![2, 1, 4]);
    }

    #[tokio::test]
    async fn status_moves_are_free_but_checked() {
        let tracker = tracker("pmplatto");
        let new: NewProgram = serde_json::from_value(json!({
            "program_id": "P010",
            "title": "新番組",
            "first_air_date": "2024-04-10",
        }))
        .unwrap();
        let created = tracker.create_program(new).await.unwrap();
        assert_eq!(created.complete_date.as_deref(), Some("2024-04-02"));

        let moved = tracker.set_program_status(created.id, "放送済み").await.unwrap();
        assert_eq!(moved.status, "放送済み");
        let back = tracker.set_program_status(created.id, "日程調整中").await.unwrap();
        assert_eq!(back.status, "日程調整中");
        assert!(matches!(
            tracker.set_program_status(created.id, "撮影中").await,
            Err(TrackerError::Validation(_))
        ));

        let patch: ProgramPatch =
            serde_json::from_value(json!({"first_air_date": "2024-05-15"})).unwrap();
        let updated = tracker.update_program(created.id, patch).await.unwrap();
        assert_eq!(updated.complete_date.as_deref(), Some("2024-05-07"));
        assert_eq!(updated.pr_due_date.as_deref(), Some("2024-04-29"));
    }

    #[tokio::test]
    async fn kanban_skips_casting_column() {
        let tracker = tracker("pmlibrary");
        let columns = tracker.program_kanban().await.unwrap();
        assert_eq!(columns.len(), 8);
        assert!(columns.iter().all(|c| c.status != "キャスティング中"));
    }
}
