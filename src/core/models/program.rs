use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{
    Record, ValidationError, blank_to_none, check_date, check_patch_date, nullable, require_text,
};
use crate::core::dates;
use crate::core::pipeline::Deployment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub program_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub status: String,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub re_air_date: Option<String>,
    #[serde(default)]
    pub filming_date: Option<String>,
    #[serde(default)]
    pub complete_date: Option<String>,
    #[serde(default)]
    pub cast1: Option<String>,
    #[serde(default)]
    pub cast2: Option<String>,
    #[serde(default)]
    pub script_url: Option<String>,
    #[serde(default)]
    pub pr_80text: Option<String>,
    #[serde(default)]
    pub pr_200text: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pr_completed: bool,
    #[serde(default)]
    pub pr_due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_episodes: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Record for Program {
    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Program {
    pub fn air_date(&self) -> Option<NaiveDate> {
        self.first_air_date.as_deref().and_then(dates::parse_date)
    }

    /// Numeric part of the program code, used as a tie breaker.
    pub fn code_number(&self) -> i64 {
        let digits: String = self
            .program_id
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        digits.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProgram {
    pub program_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub re_air_date: Option<String>,
    #[serde(default)]
    pub filming_date: Option<String>,
    #[serde(default)]
    pub complete_date: Option<String>,
    #[serde(default)]
    pub cast1: Option<String>,
    #[serde(default)]
    pub cast2: Option<String>,
    #[serde(default)]
    pub script_url: Option<String>,
    #[serde(default)]
    pub pr_80text: Option<String>,
    #[serde(default)]
    pub pr_200text: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pr_completed: bool,
    #[serde(default)]
    pub pr_due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_episodes: Option<i64>,
}

impl NewProgram {
    pub fn normalize(mut self, deployment: &Deployment) -> Result<Self, ValidationError> {
        self.program_id = self.program_id.trim().to_string();
        self.title = self.title.trim().to_string();
        for field in [
            &mut self.subtitle,
            &mut self.first_air_date,
            &mut self.re_air_date,
            &mut self.filming_date,
            &mut self.complete_date,
            &mut self.cast1,
            &mut self.cast2,
            &mut self.script_url,
            &mut self.pr_80text,
            &mut self.pr_200text,
            &mut self.notes,
            &mut self.pr_due_date,
        ] {
            *field = blank_to_none(field.take());
        }
        self.status = Some(
            blank_to_none(self.status)
                .unwrap_or_else(|| deployment.first_program_stage().to_string()),
        );

        require_text("program_id", &self.program_id)?;
        require_text("title", &self.title)?;
        if let Some(status) = &self.status
            && !deployment.is_program_stage(status)
        {
            return Err(ValidationError::invalid(
                "status",
                format!("unknown program status '{}'", status),
            ));
        }
        check_date("first_air_date", self.first_air_date.as_deref())?;
        check_date("re_air_date", self.re_air_date.as_deref())?;
        check_date("filming_date", self.filming_date.as_deref())?;
        check_date("complete_date", self.complete_date.as_deref())?;
        check_date("pr_due_date", self.pr_due_date.as_deref())?;

        if let Some(air) = self.first_air_date.as_deref().and_then(dates::parse_date) {
            if self.complete_date.is_none() {
                self.complete_date = Some(dates::format_date(dates::complete_date(air)));
            }
            if self.pr_due_date.is_none() {
                self.pr_due_date = Some(dates::format_date(dates::pr_due_date(air)));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_completed: Option<bool>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub first_air_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub re_air_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub filming_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub complete_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub pr_due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub cast1: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub cast2: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub script_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub pr_80text: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub pr_200text: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub series_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub series_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub season: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub total_episodes: Option<Option<i64>>,
}

impl ProgramPatch {
    /// Validates the patch and recomputes deadlines when the air date moves
    /// and the caller did not set them explicitly.
    pub fn normalize(mut self, deployment: &Deployment) -> Result<Self, ValidationError> {
        if let Some(code) = &self.program_id {
            require_text("program_id", code)?;
        }
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if let Some(status) = &self.status
            && !deployment.is_program_stage(status)
        {
            return Err(ValidationError::invalid(
                "status",
                format!("unknown program status '{}'", status),
            ));
        }
        check_patch_date("first_air_date", &self.first_air_date)?;
        check_patch_date("re_air_date", &self.re_air_date)?;
        check_patch_date("filming_date", &self.filming_date)?;
        check_patch_date("complete_date", &self.complete_date)?;
        check_patch_date("pr_due_date", &self.pr_due_date)?;

        if let Some(Some(air)) = &self.first_air_date
            && let Some(air) = dates::parse_date(air)
        {
            if self.complete_date.is_none() {
                self.complete_date = Some(Some(dates::format_date(dates::complete_date(air))));
            }
            if self.pr_due_date.is_none() {
                self.pr_due_date = Some(Some(dates::format_date(dates::pr_due_date(air))));
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
