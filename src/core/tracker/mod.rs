mod calendar;
mod dashboard;
mod episodes;
pub mod import;
mod programs;

pub use episodes::{EpisodeFilter, EpisodeSort, EpisodeSortField};
pub use programs::{PrStatus, ProgramFilter, ProgramSort, ProgramSortField};

use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::backend::{Backend, BackendError, Filter, Query};
use crate::core::models::{Record, ValidationError, from_row, from_rows};
use crate::core::pipeline::{Deployment, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(BackendError::Json(err))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Domain operations over one deployment's tables.
#[derive(Clone)]
pub struct Tracker {
    backend: Arc<dyn Backend>,
    deployment: Arc<Deployment>,
}

impl Tracker {
    pub fn new(backend: Arc<dyn Backend>, deployment: Arc<Deployment>) -> Self {
        Self {
            backend,
            deployment,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn episode_table(&self) -> &str {
        &self.deployment.episode_table
    }

    async fn fetch_all<T: Record>(&self, table: &str, query: Query) -> TrackerResult<Vec<T>> {
        let rows = self.backend.select(table, &query).await?;
        Ok(from_rows(rows)?)
    }

    async fn fetch_one<T: Record>(
        &self,
        table: &str,
        entity: &'static str,
        id: impl Into<Value>,
    ) -> TrackerResult<T> {
        let id = id.into();
        let rows = self
            .backend
            .select(table, &Query::new().filter(Filter::eq("id", id.clone())).limit(1))
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(from_row(row)?),
            None => Err(not_found(entity, &id)),
        }
    }

    /// Writes a patch to one row and returns the stored result.
    async fn patch_one<T: Record>(
        &self,
        table: &str,
        entity: &'static str,
        id: impl Into<Value>,
        patch: crate::core::backend::Row,
    ) -> TrackerResult<T> {
        let id = id.into();
        let rows = self
            .backend
            .update(table, &[Filter::eq("id", id.clone())], patch)
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(from_row(row)?),
            None => Err(not_found(entity, &id)),
        }
    }

    async fn delete_one(
        &self,
        table: &str,
        entity: &'static str,
        id: impl Into<Value>,
    ) -> TrackerResult<()> {
        let id = id.into();
        let rows = self
            .backend
            .delete(table, &[Filter::eq("id", id.clone())])
            .await?;
        if rows.is_empty() {
            Err(not_found(entity, &id))
        } else {
            Ok(())
        }
    }
}

fn not_found(entity: &'static str, id: &Value) -> TrackerError {
    TrackerError::NotFound {
        entity,
        id: match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// Orders two optional keys with missing values last in either direction.
pub(crate) fn cmp_nulls_last<T: Ord>(a: Option<T>, b: Option<T>, ascending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            if ascending {
                a.cmp(&b)
            } else {
                b.cmp(&a)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::backend::{LocalBackend, schema};

    pub fn tracker(app: &str) -> Tracker {
        let deployment = Deployment::preset(app).expect("preset");
        let backend =
            LocalBackend::in_memory(schema(&deployment.episode_table)).expect("local backend");
        Tracker::new(Arc::new(backend), Arc::new(deployment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_last_both_ways() {
        let mut values = vec![None, Some(2), Some(1)];
        values.sort_by(|a, b| cmp_nulls_last(*a, *b, true));
        assert_eq!(values, vec![Some(1), Some(2), None]);
        values.sort_by(|a, b| cmp_nulls_last(*a, *b, false));
        assert_eq!(values, vec![Some(2), Some(1), None]);
    }

    #[test]
    fn case_insensitive_contains() {
        assert!(contains_ci(Some("Yamada Taro"), "yamada"));
        assert!(!contains_ci(None, "yamada"));
    }
}
