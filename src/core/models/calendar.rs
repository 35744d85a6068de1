use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Record, ValidationError, blank_to_none, nullable, require_text};
use crate::core::dates;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarTask {
    pub id: String,
    #[serde(default)]
    pub program_id: Option<i64>,
    pub task_type: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_team_event: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Record for CalendarTask {
    fn key(&self) -> String {
        self.id.clone()
    }
}

impl CalendarTask {
    pub fn start(&self) -> Option<NaiveDate> {
        dates::parse_date(&self.start_date)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        dates::parse_date(&self.end_date)
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => start <= day && day <= end,
            _ => false,
        }
    }
}

fn check_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let start_date = dates::parse_date(start)
        .ok_or_else(|| ValidationError::invalid("start_date", format!("'{}' is not a date", start)))?;
    let end_date = dates::parse_date(end)
        .ok_or_else(|| ValidationError::invalid("end_date", format!("'{}' is not a date", end)))?;
    if end_date < start_date {
        return Err(ValidationError::invalid(
            "end_date",
            "must not be before start_date",
        ));
    }
    Ok((start_date, end_date))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCalendarTask {
    #[serde(default)]
    pub program_id: Option<i64>,
    pub task_type: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_team_event: bool,
}

impl NewCalendarTask {
    pub fn normalize(mut self) -> Result<Self, ValidationError> {
        self.task_type = self.task_type.trim().to_string();
        require_text("task_type", &self.task_type)?;
        check_range(&self.start_date, &self.end_date)?;
        if self.is_team_event {
            self.meeting_url = blank_to_none(self.meeting_url);
            self.description = blank_to_none(self.description);
        } else {
            self.meeting_url = None;
            self.description = None;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarTaskPatch {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub program_id: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_team_event: Option<bool>,
}

impl CalendarTaskPatch {
    /// Checks the patch against the stored task so the merged range stays valid.
    pub fn validate_against(&self, current: &CalendarTask) -> Result<(), ValidationError> {
        if let Some(task_type) = &self.task_type {
            require_text("task_type", task_type)?;
        }
        let start = self.start_date.as_deref().unwrap_or(&current.start_date);
        let end = self.end_date.as_deref().unwrap_or(&current.end_date);
        check_range(start, end)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(start: &str, end: &str) -> CalendarTask {
        CalendarTask {
            id: "t1".into(),
            program_id: Some(7),
            task_type: "編集".into(),
            start_date: start.into(),
            end_date: end.into(),
            meeting_url: None,
            description: None,
            is_team_event: false,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn covers_is_inclusive() {
        let t = task("2024-04-08", "2024-04-10");
        let day = |s: &str| dates::parse_date(s).unwrap();
        assert!(t.covers(day("2024-04-08")));
        assert!(t.covers(day("2024-04-10")));
        assert!(!t.covers(day("2024-04-11")));
    }

    #[test]
    fn new_task_rejects_inverted_range() {
        let t = NewCalendarTask {
            program_id: None,
            task_type: "MA".into(),
            start_date: "2024-04-10".into(),
            end_date: "2024-04-09".into(),
            meeting_url: None,
            description: None,
            is_team_event: false,
        };
        assert!(t.normalize().is_err());
    }

    #[test]
    fn plain_task_drops_meeting_fields() {
        let t = NewCalendarTask {
            program_id: None,
            task_type: "試写".into(),
            start_date: "2024-04-10".into(),
            end_date: "2024-04-10".into(),
            meeting_url: Some("https://meet.example.com/x".into()),
            description: Some("memo".into()),
            is_team_event: false,
        }
        .normalize()
        .unwrap();
        assert_eq!(t.meeting_url, None);
        assert_eq!(t.description, None);
    }

    #[test]
    fn patch_is_checked_against_stored_range() {
        let current = task("2024-04-08", "2024-04-10");
        let patch = CalendarTaskPatch {
            start_date: Some("2024-04-12".into()),
            ..Default::default()
        };
        assert!(patch.validate_against(&current).is_err());
        let patch = CalendarTaskPatch {
            start_date: Some("2024-04-09".into()),
            ..Default::default()
        };
        assert!(patch.validate_against(&current).is_ok());
    }
}
