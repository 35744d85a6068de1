pub(crate) mod auth;
mod handlers;
mod router;

pub use router::build_api_router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};

use crate::core::backend::{AuthProvider, Change, schema};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::review::ReviewService;
use crate::core::tracker::Tracker;

const EVENT_BUFFER: usize = 256;

pub struct ApiServerConfig {
    pub tracker: Tracker,
    pub auth: Arc<dyn AuthProvider>,
    pub review: Arc<ReviewService>,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    /// Browser origins allowed by CORS, e.g. the frontend dev server.
    pub allowed_origins: Vec<String>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) tracker: Tracker,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) review: Arc<ReviewService>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) events_tx: broadcast::Sender<Change>,
    pub(crate) allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub(crate) fn new(config: &ApiServerConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            tracker: config.tracker.clone(),
            auth: config.auth.clone(),
            review: config.review.clone(),
            log_tx: config.log_tx.clone(),
            events_tx,
            allowed_origins: Arc::new(config.allowed_origins.clone()),
        }
    }
}

/// HTTP API plus the change-feed fan-out behind `/api/events`.
pub struct ApiServer {
    state: AppState,
    addr: String,
    tasks: Vec<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        let state = AppState::new(&config);
        Self {
            state,
            addr: format!("{}:{}", config.api_host, config.api_port),
            tasks: Vec::new(),
        }
    }

    async fn forward_changes(&mut self) {
        let tables = schema(self.state.tracker.episode_table());
        for table in tables {
            match self.state.tracker.backend().subscribe(&table.name).await {
                Ok(mut feed) => {
                    let tx = self.state.events_tx.clone();
                    let name = table.name.clone();
                    self.tasks.push(tokio::spawn(async move {
                        while let Some(change) = feed.recv().await {
                            let _ = tx.send(change); // Ignored if no receivers
                        }
                        warn!("Change feed for {} closed", name);
                    }));
                }
                Err(e) => warn!("Not streaming {} changes: {}", table.name, e),
            }
        }
    }
}

// --- SSE streams (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn change_event(change: &Change) -> Event {
    Event::default()
        .event(change.table.clone())
        .json_data(change)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

async fn sse_events_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(change) => Ok(change_event(&change)),
        Err(_) => Ok(Event::default().event("lagged").data("Event stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- Lifecycle Implementations ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        self.forward_changes().await;
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        let app = build_api_router(self.state.clone());
        let addr = self.addr.clone();
        self.tasks.push(tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ChangeKind;
    use serde_json::json;

    #[tokio::test]
    async fn forwarded_changes_reach_event_subscribers() {
        let state = test_support::state().await;
        let mut server = ApiServer {
            state: state.clone(),
            addr: "127.0.0.1:0".into(),
            tasks: Vec::new(),
        };
        server.forward_changes().await;
        let mut rx = state.events_tx.subscribe();

        state
            .tracker
            .create_task(
                serde_json::from_value(json!({
                    "task_type": "編集", "start_date": "2024-04-08", "end_date": "2024-04-08"
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let change = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.table, "calendar_tasks");
        assert_eq!(change.kind, ChangeKind::Insert);
        server.on_shutdown().await.unwrap();
    }
}
