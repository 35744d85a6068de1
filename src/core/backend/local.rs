use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{info, warn};

use super::{
    Backend, BackendError, Change, ChangeFeed, ChangeKind, Filter, FilterOp, IdKind, Query, Row,
    TableSpec,
};
use crate::core::dates;
use crate::core::models::{key_of, row_key};

/// SQLite stand-in for the hosted backend. Each table keeps one JSON
/// document per row; filters and ordering go through `json_extract`.
pub struct LocalBackend {
    db: Arc<Mutex<Connection>>,
    tables: HashMap<String, TableSpec>,
    changes: broadcast::Sender<Change>,
}

fn column_path(column: &str) -> Result<String, BackendError> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("$.{}", column))
    } else {
        Err(BackendError::InvalidColumn(column.to_string()))
    }
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Builds the WHERE clause and its parameters.
fn where_clause(filters: &[Filter], params: &mut Vec<SqlValue>) -> Result<String, BackendError> {
    let mut clauses = Vec::new();
    for filter in filters {
        let path = column_path(&filter.column)?;
        params.push(SqlValue::Text(path));
        let target = format!("json_extract(doc, ?{})", params.len());
        if filter.value.is_null() {
            match filter.op {
                FilterOp::Eq => clauses.push(format!("{} IS NULL", target)),
                _ => clauses.push("0".to_string()),
            }
            continue;
        }
        let op = match filter.op {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        };
        params.push(sql_value(&filter.value));
        clauses.push(format!("{} {} ?{}", target, op, params.len()));
    }
    if clauses.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", clauses.join(" AND ")))
    }
}

fn parse_doc(raw: String) -> Result<Row, BackendError> {
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(BackendError::Corrupt("not an object".into())),
    }
}

fn select_docs(
    db: &Connection,
    table: &str,
    filters: &[Filter],
) -> Result<Vec<(i64, Row)>, BackendError> {
    let mut params = Vec::new();
    let sql = format!(
        "SELECT seq, doc FROM \"{}\"{} ORDER BY seq",
        table,
        where_clause(filters, &mut params)?
    );
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut docs = Vec::new();
    for row in rows {
        let (seq, raw) = row?;
        docs.push((seq, parse_doc(raw)?));
    }
    Ok(docs)
}

impl LocalBackend {
    pub async fn open(path: &Path, tables: Vec<TableSpec>) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Connection::open(path)?;
        info!("Opened local store at {}", path.display());
        Self::with_connection(db, tables)
    }

    #[cfg(test)]
    pub fn in_memory(tables: Vec<TableSpec>) -> Result<Self, BackendError> {
        Self::with_connection(Connection::open_in_memory()?, tables)
    }

    fn with_connection(db: Connection, tables: Vec<TableSpec>) -> Result<Self, BackendError> {
        for spec in &tables {
            db.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\" (
                        seq INTEGER PRIMARY KEY AUTOINCREMENT,
                        id TEXT NOT NULL UNIQUE,
                        doc TEXT NOT NULL
                    )",
                    spec.name
                ),
                [],
            )?;
        }
        let (changes, _) = broadcast::channel(512);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            changes,
        })
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    fn spec(&self, table: &str) -> Result<&TableSpec, BackendError> {
        self.tables
            .get(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
    }

    fn publish(&self, table: &str, kind: ChangeKind, new: Option<Row>, old: Option<Row>) {
        // No receivers is fine.
        let _ = self.changes.send(Change {
            table: table.to_string(),
            kind,
            new,
            old,
        });
    }

    fn insert_one(db: &Connection, spec: &TableSpec, mut row: Row) -> Result<Row, BackendError> {
        if row.get("id").is_none_or(Value::is_null) {
            let id = match spec.id {
                IdKind::Serial => {
                    let next: i64 = db.query_row(
                        &format!(
                            "SELECT COALESCE(MAX(CAST(id AS INTEGER)), 0) + 1 FROM \"{}\"",
                            spec.name
                        ),
                        [],
                        |r| r.get(0),
                    )?;
                    Value::from(next)
                }
                IdKind::Uuid => Value::from(uuid::Uuid::new_v4().to_string()),
            };
            row.insert("id".into(), id);
        }
        let now = dates::now_rfc3339();
        if row
            .get(spec.created_column)
            .is_none_or(Value::is_null)
        {
            row.insert(spec.created_column.into(), Value::from(now.clone()));
        }
        if let Some(touch) = spec.touch_column
            && row.get(touch).is_none_or(Value::is_null)
        {
            row.insert(touch.into(), Value::from(now));
        }
        let key = row_key(&row).ok_or_else(|| BackendError::InvalidColumn("id".into()))?;
        db.execute(
            &format!("INSERT INTO \"{}\" (id, doc) VALUES (?1, ?2)", spec.name),
            params![key, serde_json::to_string(&row)?],
        )?;
        Ok(row)
    }

    fn apply_patch(spec: &TableSpec, doc: &Row, patch: &Row) -> Row {
        let mut merged = doc.clone();
        for (k, v) in patch {
            if k != "id" {
                merged.insert(k.clone(), v.clone());
            }
        }
        if let Some(touch) = spec.touch_column {
            merged.insert(touch.into(), Value::from(dates::now_rfc3339()));
        }
        merged
    }

    fn write_doc(db: &Connection, spec: &TableSpec, seq: i64, doc: &Row) -> Result<(), BackendError> {
        db.execute(
            &format!("UPDATE \"{}\" SET doc = ?1 WHERE seq = ?2", spec.name),
            params![serde_json::to_string(doc)?, seq],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        self.spec(table)?;
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT doc FROM \"{}\"{}",
            table,
            where_clause(&query.filters, &mut params)?
        );

        let mut order_terms = Vec::new();
        for order in &query.order {
            params.push(SqlValue::Text(column_path(&order.column)?));
            let target = format!("json_extract(doc, ?{})", params.len());
            // Postgres places nulls last ascending and first descending.
            if order.ascending {
                order_terms.push(format!("({} IS NULL) ASC, {} ASC", target, target));
            } else {
                order_terms.push(format!("({} IS NULL) DESC, {} DESC", target, target));
            }
        }
        order_terms.push("seq ASC".to_string());
        sql.push_str(&format!(" ORDER BY {}", order_terms.join(", ")));
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let db = self.db.lock().await;
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(parse_doc(raw?)?);
        }
        Ok(out)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        let spec = self.spec(table)?.clone();
        let inserted = {
            let mut db = self.db.lock().await;
            let tx = db.transaction()?;
            let mut inserted = Vec::with_capacity(rows.len());
            for row in rows {
                inserted.push(Self::insert_one(&tx, &spec, row)?);
            }
            tx.commit()?;
            inserted
        };
        for row in &inserted {
            self.publish(table, ChangeKind::Insert, Some(row.clone()), None);
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        let spec = self.spec(table)?.clone();
        let changed = {
            let db = self.db.lock().await;
            let mut changed = Vec::new();
            for (seq, doc) in select_docs(&db, table, filters)? {
                let merged = Self::apply_patch(&spec, &doc, &patch);
                Self::write_doc(&db, &spec, seq, &merged)?;
                changed.push((doc, merged));
            }
            changed
        };
        let mut out = Vec::with_capacity(changed.len());
        for (old, new) in changed {
            self.publish(table, ChangeKind::Update, Some(new.clone()), Some(old));
            out.push(new);
        }
        Ok(out)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        self.spec(table)?;
        let removed = {
            let db = self.db.lock().await;
            let docs = select_docs(&db, table, filters)?;
            for (seq, _) in &docs {
                db.execute(
                    &format!("DELETE FROM \"{}\" WHERE seq = ?1", table),
                    params![seq],
                )?;
            }
            docs.into_iter().map(|(_, doc)| doc).collect::<Vec<_>>()
        };
        for old in &removed {
            self.publish(table, ChangeKind::Delete, None, Some(old.clone()));
        }
        Ok(removed)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        let spec = self.spec(table)?.clone();
        let mut events = Vec::new();
        {
            let db = self.db.lock().await;
            for row in rows {
                let existing = match row.get("id").and_then(key_of) {
                    Some(key) => db
                        .query_row(
                            &format!("SELECT seq, doc FROM \"{}\" WHERE id = ?1", table),
                            params![key],
                            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
                        )
                        .optional()?,
                    None => None,
                };
                match existing {
                    Some((seq, raw)) => {
                        let old = parse_doc(raw)?;
                        let merged = Self::apply_patch(&spec, &old, &row);
                        Self::write_doc(&db, &spec, seq, &merged)?;
                        events.push((ChangeKind::Update, merged, Some(old)));
                    }
                    None => {
                        let inserted = Self::insert_one(&db, &spec, row)?;
                        events.push((ChangeKind::Insert, inserted, None));
                    }
                }
            }
        }
        let mut out = Vec::with_capacity(events.len());
        for (kind, new, old) in events {
            self.publish(table, kind, Some(new.clone()), old);
            out.push(new);
        }
        Ok(out)
    }

    async fn subscribe(&self, table: &str) -> Result<ChangeFeed, BackendError> {
        self.spec(table)?;
        let mut bus = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(256);
        let table = table.to_string();
        let task = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(change) if change.table == table => {
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Change feed for {} lagged, skipped {} events", table, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(ChangeFeed::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{PROGRAMS, TEAM_DASHBOARD, schema};
    use serde_json::json;

    fn backend() -> LocalBackend {
        LocalBackend::in_memory(schema("episodes")).expect("local backend")
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_serial_ids_and_timestamps() {
        let b = backend();
        let rows = b
            .insert(
                PROGRAMS,
                vec![
                    row(json!({"program_id": "P1", "title": "a", "status": "編集中"})),
                    row(json!({"program_id": "P2", "title": "b", "status": "編集中"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], json!(2));
        assert!(rows[0]["created_at"].is_string());
        assert!(rows[0]["updated_at"].is_string());
    }

    #[tokio::test]
    async fn uuid_tables_get_string_ids() {
        let b = backend();
        let rows = b
            .insert(TEAM_DASHBOARD, vec![row(json!({"widget_type": "memo", "title": "m"}))])
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(rows[0]["id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn select_filters_orders_with_nulls_last_and_limits() {
        let b = backend();
        b.insert(
            PROGRAMS,
            vec![
                row(json!({"program_id": "P1", "title": "a", "status": "編集中", "first_air_date": null})),
                row(json!({"program_id": "P2", "title": "b", "status": "編集中", "first_air_date": "2024-05-01"})),
                row(json!({"program_id": "P3", "title": "c", "status": "MA中", "first_air_date": "2024-04-01"})),
            ],
        )
        .await
        .unwrap();

        let asc = b
            .select(PROGRAMS, &Query::new().order_by("first_air_date", true))
            .await
            .unwrap();
        let codes: Vec<_> = asc.iter().map(|r| r["program_id"].clone()).collect();
        assert_eq!(codes, vec![json!("P3"), json!("P2"), json!("P1")]);

        let desc = b
            .select(PROGRAMS, &Query::new().order_by("first_air_date", false))
            .await
            .unwrap();
        assert_eq!(desc[0]["program_id"], json!("P1"));

        let editing = b
            .select(PROGRAMS, &Query::new().eq("status", "編集中").limit(1))
            .await
            .unwrap();
        assert_eq!(editing.len(), 1);
        assert_eq!(editing[0]["program_id"], json!("P1"));
    }

    #[tokio::test]
    async fn update_merges_patch_and_emits_change() {
        let b = backend();
        let mut feed = b.subscribe(PROGRAMS).await.unwrap();
        b.insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
            .await
            .unwrap();
        let updated = b
            .update(PROGRAMS, &[Filter::eq("id", 1)], row(json!({"status": "MA中", "id": 99})))
            .await
            .unwrap();
        assert_eq!(updated[0]["status"], json!("MA中"));
        assert_eq!(updated[0]["id"], json!(1));
        assert_eq!(updated[0]["title"], json!("a"));

        let first = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        let second = feed.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Update);
        assert_eq!(second.old.unwrap()["status"], json!("編集中"));
    }

    #[tokio::test]
    async fn delete_and_upsert() {
        let b = backend();
        b.insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
            .await
            .unwrap();
        let upserted = b
            .upsert(
                PROGRAMS,
                vec![
                    row(json!({"id": 1, "title": "renamed"})),
                    row(json!({"program_id": "P2", "title": "new", "status": "MA中"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(upserted[0]["title"], json!("renamed"));
        assert_eq!(upserted[0]["program_id"], json!("P1"));
        assert_eq!(upserted[1]["id"], json!(2));

        let removed = b.delete(PROGRAMS, &[Filter::eq("id", 1)]).await.unwrap();
        assert_eq!(removed.len(), 1);
        let left = b.select(PROGRAMS, &Query::new()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn unknown_table_and_bad_column_are_rejected() {
        let b = backend();
        assert!(matches!(
            b.select("users", &Query::new()).await,
            Err(BackendError::UnknownTable(_))
        ));
        assert!(matches!(
            b.select(PROGRAMS, &Query::new().eq("title') OR 1=1 --", "x")).await,
            Err(BackendError::InvalidColumn(_))
        ));
    }

    #[tokio::test]
    async fn feed_only_sees_its_table() {
        let b = backend();
        let mut feed = b.subscribe(TEAM_DASHBOARD).await.unwrap();
        b.insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
            .await
            .unwrap();
        b.insert(TEAM_DASHBOARD, vec![row(json!({"widget_type": "memo", "title": "m"}))])
            .await
            .unwrap();
        let change = feed.recv().await.unwrap();
        assert_eq!(change.table, TEAM_DASHBOARD);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm.db");
        {
            let b = LocalBackend::open(&path, schema("episodes")).await.unwrap();
            b.insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
                .await
                .unwrap();
        }
        let b = LocalBackend::open(&path, schema("episodes")).await.unwrap();
        let rows = b.select(PROGRAMS, &Query::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["program_id"], json!("P1"));
    }
}
