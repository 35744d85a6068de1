use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{
    Record, ValidationError, blank_to_none, check_date, check_patch_date, nullable, require_text,
};
use crate::core::dates;
use crate::core::pipeline::Deployment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    Interview,
    Vtr,
}

impl FromStr for EpisodeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interview" => Ok(Self::Interview),
            "vtr" => Ok(Self::Vtr),
            other => Err(ValidationError::invalid(
                "episode_type",
                format!("'{}' is not interview or vtr", other),
            )),
        }
    }
}

impl fmt::Display for EpisodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interview => write!(f, "interview"),
            Self::Vtr => write!(f, "vtr"),
        }
    }
}

/// Material readiness for VTR episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialStatus {
    #[serde(rename = "○")]
    Ready,
    #[serde(rename = "△")]
    Partial,
    #[serde(rename = "×")]
    Missing,
}

impl FromStr for MaterialStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "○" => Ok(Self::Ready),
            "△" => Ok(Self::Partial),
            "×" => Ok(Self::Missing),
            other => Err(ValidationError::invalid(
                "material_status",
                format!("'{}' is not one of ○ △ ×", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub episode_id: String,
    pub title: String,
    pub episode_type: EpisodeType,
    pub season: i64,
    pub episode_number: i64,
    #[serde(default)]
    pub script_url: Option<String>,
    pub current_status: String,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub recording_date: Option<String>,
    #[serde(default)]
    pub recording_location: Option<String>,
    #[serde(default)]
    pub material_status: Option<MaterialStatus>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Record for Episode {
    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Episode {
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(dates::parse_date)
    }

    pub fn is_overdue(&self, today: NaiveDate, delivered_stage: &str) -> bool {
        self.current_status != delivered_stage && self.due().is_some_and(|due| due < today)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEpisode {
    pub episode_id: String,
    pub title: String,
    pub episode_type: EpisodeType,
    pub season: i64,
    pub episode_number: i64,
    #[serde(default)]
    pub script_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub recording_date: Option<String>,
    #[serde(default)]
    pub recording_location: Option<String>,
    #[serde(default)]
    pub material_status: Option<MaterialStatus>,
}

impl NewEpisode {
    /// Trims blanks to null, fills the default stage and checks the form.
    pub fn normalize(mut self, deployment: &Deployment) -> Result<Self, ValidationError> {
        self.episode_id = self.episode_id.trim().to_string();
        self.title = self.title.trim().to_string();
        self.script_url = blank_to_none(self.script_url);
        self.director = blank_to_none(self.director);
        self.due_date = blank_to_none(self.due_date);
        self.guest_name = blank_to_none(self.guest_name);
        self.recording_date = blank_to_none(self.recording_date);
        self.recording_location = blank_to_none(self.recording_location);
        self.current_status = Some(
            blank_to_none(self.current_status).unwrap_or_else(|| deployment.first_stage().to_string()),
        );

        require_text("episode_id", &self.episode_id)?;
        require_text("title", &self.title)?;
        if self.season < 1 {
            return Err(ValidationError::invalid("season", "must be positive"));
        }
        if self.episode_number < 1 {
            return Err(ValidationError::invalid("episode_number", "must be positive"));
        }
        if let Some(status) = &self.current_status
            && deployment.stage_index(status).is_none()
        {
            return Err(ValidationError::invalid(
                "current_status",
                format!("unknown status '{}'", status),
            ));
        }
        check_date("due_date", self.due_date.as_deref())?;
        check_date("recording_date", self.recording_date.as_deref())?;
        Ok(self)
    }
}

/// Partial update. Status moves are not accepted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_type: Option<EpisodeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<i64>,
    #[serde(default, skip_serializing)]
    pub current_status: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub script_url: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub director: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub guest_name: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub recording_date: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub recording_location: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub material_status: Option<Option<MaterialStatus>>,
}

impl EpisodePatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.current_status.is_some() {
            return Err(ValidationError::invalid(
                "current_status",
                "status changes go through the status endpoint",
            ));
        }
        if let Some(code) = &self.episode_id {
            require_text("episode_id", code)?;
        }
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if self.season.is_some_and(|s| s < 1) {
            return Err(ValidationError::invalid("season", "must be positive"));
        }
        if self.episode_number.is_some_and(|n| n < 1) {
            return Err(ValidationError::invalid("episode_number", "must be positive"));
        }
        check_patch_date("due_date", &self.due_date)?;
        check_patch_date("recording_date", &self.recording_date)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
