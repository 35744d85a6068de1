mod record_set;

pub use record_set::RecordSet;

use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::backend::{Backend, Change, Filter, Query};
use crate::core::models::{Record, from_rows};

struct SyncState<T: Record> {
    set: RecordSet<T>,
    last_error: Option<String>,
}

/// A table mirror kept current by the backend change feed. Owned by its
/// holder; dropping it stops the feed.
pub struct Synced<T: Record> {
    table: String,
    state: Arc<RwLock<SyncState<T>>>,
    version: Arc<watch::Sender<u64>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Record> Synced<T> {
    /// Subscribes first, then loads, so no change between the two is lost.
    /// Replayed changes are absorbed by the keyed replace.
    pub async fn start(backend: Arc<dyn Backend>, table: &str, filters: Vec<Filter>) -> Self {
        let state = Arc::new(RwLock::new(SyncState {
            set: RecordSet::new(filters.clone()),
            last_error: None,
        }));
        let (version, _) = watch::channel(0u64);
        let version = Arc::new(version);

        let feed = match backend.subscribe(table).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!("Could not subscribe to {}: {}", table, e);
                state.write().await.last_error = Some(e.to_string());
                None
            }
        };

        let query = Query {
            filters,
            ..Query::default()
        };
        match backend.select(table, &query).await {
            Ok(rows) => match from_rows::<T>(rows) {
                Ok(records) => {
                    let mut guard = state.write().await;
                    info!("Loaded {} rows from {}", records.len(), table);
                    guard.set.load(records);
                }
                Err(e) => state.write().await.last_error = Some(e.to_string()),
            },
            Err(e) => {
                warn!("Initial load of {} failed: {}", table, e);
                state.write().await.last_error = Some(e.to_string());
            }
        }
        version.send_modify(|v| *v += 1);

        let task = feed.map(|mut feed| {
            let state = state.clone();
            let version = version.clone();
            let table = table.to_string();
            tokio::spawn(async move {
                while let Some(change) = feed.recv().await {
                    if apply_change(&state, &change).await {
                        version.send_modify(|v| *v += 1);
                    }
                }
                warn!("Change feed for {} ended", table);
                state.write().await.last_error = Some(format!("{} の変更通知が切断されました", table));
                version.send_modify(|v| *v += 1);
            })
        });

        Self {
            table: table.to_string(),
            state,
            version,
            task,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn rows(&self) -> Vec<T> {
        self.state.read().await.set.rows().to_vec()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    /// Ticks after the initial load and after every applied change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

async fn apply_change<T: Record>(state: &RwLock<SyncState<T>>, change: &Change) -> bool {
    let mut guard = state.write().await;
    match guard.set.apply(change) {
        Ok(changed) => changed,
        Err(e) => {
            warn!("Dropping malformed {} change: {}", change.table, e);
            guard.last_error = Some(e.to_string());
            true
        }
    }
}

impl<T: Record> Drop for Synced<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{LocalBackend, PROGRAMS, Row, schema};
    use crate::core::models::Program;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn wait_for(rx: &mut watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("change should arrive")
            .expect("sender alive");
    }

    #[tokio::test]
    async fn mirror_loads_then_follows_feed() {
        let backend = Arc::new(LocalBackend::in_memory(schema("episodes")).unwrap());
        backend
            .insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
            .await
            .unwrap();

        let synced: Synced<Program> = Synced::start(backend.clone(), PROGRAMS, Vec::new()).await;
        assert_eq!(synced.rows().await.len(), 1);
        assert!(synced.last_error().await.is_none());

        let mut rx = synced.changes();
        rx.borrow_and_update();
        backend
            .insert(PROGRAMS, vec![row(json!({"program_id": "P2", "title": "b", "status": "MA中"}))])
            .await
            .unwrap();
        wait_for(&mut rx).await;
        let rows = synced.rows().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].program_id, "P2");
    }

    #[tokio::test]
    async fn filtered_mirror_drops_rows_leaving_the_filter() {
        let backend = Arc::new(LocalBackend::in_memory(schema("episodes")).unwrap());
        backend
            .insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
            .await
            .unwrap();
        let synced: Synced<Program> =
            Synced::start(backend.clone(), PROGRAMS, vec![Filter::eq("status", "編集中")]).await;
        assert_eq!(synced.rows().await.len(), 1);

        let mut rx = synced.changes();
        rx.borrow_and_update();
        backend
            .update(PROGRAMS, &[Filter::eq("id", 1)], row(json!({"status": "MA中"})))
            .await
            .unwrap();
        wait_for(&mut rx).await;
        assert!(synced.rows().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_updates_keep_one_row() {
        let backend = Arc::new(LocalBackend::in_memory(schema("episodes")).unwrap());
        backend
            .insert(PROGRAMS, vec![row(json!({"program_id": "P1", "title": "a", "status": "編集中"}))])
            .await
            .unwrap();
        let synced: Synced<Program> = Synced::start(backend.clone(), PROGRAMS, Vec::new()).await;
        let mut rx = synced.changes();
        rx.borrow_and_update();

        for title in ["b", "c"] {
            backend
                .update(PROGRAMS, &[Filter::eq("id", 1)], row(json!({"title": title})))
                .await
                .unwrap();
            wait_for(&mut rx).await;
        }
        let rows = synced.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "c");
    }
}
