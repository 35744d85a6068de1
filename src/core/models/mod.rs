pub mod calendar;
pub mod dashboard;
pub mod episode;
pub mod history;
pub mod program;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::backend::Row;
use crate::core::dates;

pub use calendar::{CalendarTask, CalendarTaskPatch, NewCalendarTask};
pub use dashboard::{DashboardWidget, NewWidget, WidgetKind, WidgetPatch};
pub use episode::{Episode, EpisodePatch, EpisodeType, NewEpisode};
pub use history::{NewStatusHistory, StatusHistory};
pub use program::{NewProgram, Program, ProgramPatch};

/// Form-level rejection raised before any write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ValidationError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// A row type mirrored by the sync layer, keyed by its `id` column.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn key(&self) -> String;
}

/// Normalizes an `id` value so serial and uuid keys compare the same way.
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

pub fn row_key(row: &Row) -> Option<String> {
    row.get("id").and_then(key_of)
}

pub fn to_row<T: Serialize>(value: &T) -> serde_json::Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(row))
}

pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> serde_json::Result<Vec<T>> {
    rows.into_iter().map(from_row).collect()
}

/// Lets patch structs tell "absent" (`None`) from "set to null" (`Some(None)`).
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Missing(field))
    } else {
        Ok(())
    }
}

pub(crate) fn check_date(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(raw) if dates::parse_date(raw).is_none() => Err(ValidationError::invalid(
            field,
            format!("'{}' is not a YYYY-MM-DD date", raw),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn check_patch_date(
    field: &'static str,
    value: &Option<Option<String>>,
) -> Result<(), ValidationError> {
    check_date(field, value.as_ref().and_then(|v| v.as_deref()))
}

/// Empty strings from forms are stored as null.
pub(crate) fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
