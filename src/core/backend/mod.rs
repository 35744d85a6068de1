pub mod auth;
pub mod hosted;
pub mod local;
mod realtime;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use auth::{AuthError, AuthProvider, AuthUser, HostedAuth, LocalAuth};
pub use hosted::HostedBackend;
pub use local::LocalBackend;

pub type Row = serde_json::Map<String, Value>;

pub const PROGRAMS: &str = "programs";
pub const STATUS_HISTORY: &str = "status_history";
pub const CALENDAR_TASKS: &str = "calendar_tasks";
pub const TEAM_DASHBOARD: &str = "team_dashboard";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed row: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("invalid column name '{0}'")]
    InvalidColumn(String),
    #[error("realtime channel error: {0}")]
    Realtime(String),
    #[error("corrupt stored document: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Gte => "gte",
            Self::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Gte, value)
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Lte, value)
    }

    /// In-memory evaluation with SQL null semantics: only `eq null` can
    /// match a missing value.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        if self.value.is_null() {
            return self.op == FilterOp::Eq && actual.is_null();
        }
        if actual.is_null() {
            return false;
        }
        let Some(ordering) = compare_values(actual, &self.value) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Gte => ordering != Ordering::Less,
            FilterOp::Lte => ordering != Ordering::Greater,
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// `select` modifiers: conjunctive filters, ordering and limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub table: String,
    pub kind: ChangeKind,
    pub new: Option<Row>,
    pub old: Option<Row>,
}

/// Live subscription to one table. Dropping the feed stops its forwarding
/// task.
pub struct ChangeFeed {
    rx: mpsc::Receiver<Change>,
    task: JoinHandle<()>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::Receiver<Change>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for ChangeFeed {
    type Item = Change;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Change>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Serial,
    Uuid,
}

/// Local-mode table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub id: IdKind,
    /// Timestamp column filled on insert when absent.
    pub created_column: &'static str,
    /// Timestamp column refreshed on every update.
    pub touch_column: Option<&'static str>,
}

impl TableSpec {
    fn new(name: &str, id: IdKind, created_column: &'static str, touch: Option<&'static str>) -> Self {
        Self {
            name: name.to_string(),
            id,
            created_column,
            touch_column: touch,
        }
    }
}

/// Tables used by one deployment.
pub fn schema(episode_table: &str) -> Vec<TableSpec> {
    vec![
        TableSpec::new(PROGRAMS, IdKind::Serial, "created_at", Some("updated_at")),
        TableSpec::new(episode_table, IdKind::Serial, "created_at", Some("updated_at")),
        TableSpec::new(STATUS_HISTORY, IdKind::Serial, "changed_at", None),
        TableSpec::new(CALENDAR_TASKS, IdKind::Uuid, "created_at", Some("updated_at")),
        TableSpec::new(TEAM_DASHBOARD, IdKind::Uuid, "created_at", Some("updated_at")),
    ]
}

/// Table-scoped row store with a per-table change feed. Writes return the
/// affected rows; change events may arrive before or after that response.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError>;
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError>;
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError>;
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError>;
    async fn upsert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError>;
    async fn subscribe(&self, table: &str) -> Result<ChangeFeed, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn filters_follow_sql_null_semantics() {
        let r = row(json!({"id": 1, "director": null, "season": 2}));
        assert!(Filter::eq("director", Value::Null).matches(&r));
        assert!(!Filter::eq("director", "山田").matches(&r));
        assert!(!Filter::gte("director", "山田").matches(&r));
        assert!(Filter::eq("missing", Value::Null).matches(&r));
        assert!(Filter::gte("season", 2).matches(&r));
        assert!(!Filter::gte("season", Value::Null).matches(&r));
        assert!(Filter::lte("season", 3).matches(&r));
    }

    #[test]
    fn filters_compare_dates_as_strings() {
        let r = row(json!({"start_date": "2024-04-08"}));
        assert!(Filter::gte("start_date", "2024-04-08").matches(&r));
        assert!(Filter::lte("start_date", "2024-04-14").matches(&r));
        assert!(!Filter::lte("start_date", "2024-04-07").matches(&r));
    }

    #[test]
    fn mixed_types_never_match() {
        let r = row(json!({"season": 1}));
        assert!(!Filter::eq("season", "1").matches(&r));
        assert!(!Filter::neq("season", "1").matches(&r));
    }

    #[test]
    fn schema_uses_deployment_episode_table() {
        let tables = schema("liberary_episode");
        assert_eq!(tables.len(), 5);
        assert!(tables.iter().any(|t| t.name == "liberary_episode"));
        let history = tables.iter().find(|t| t.name == STATUS_HISTORY).unwrap();
        assert_eq!(history.touch_column, None);
        let widgets = tables.iter().find(|t| t.name == TEAM_DASHBOARD).unwrap();
        assert_eq!(widgets.id, IdKind::Uuid);
    }
}
