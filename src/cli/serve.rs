use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config::{AppConfig, Overrides};
use crate::core::lifecycle::LifecycleManager;
use crate::core::review::{ReviewService, job};
use crate::core::terminal::{self, GuideSection};
use crate::core::tracker::Tracker;
use crate::interfaces::web::{ApiServer, ApiServerConfig};

pub async fn run_serve(overrides: Overrides) -> Result<()> {
    let config = AppConfig::from_env(overrides)?;
    let deployment = Arc::new(config.deployment()?);
    let log_tx = crate::logging::init(false);

    terminal::print_banner(&deployment.display_name);
    info!(
        "Starting pmboard ({}, {} backend)...",
        deployment.app,
        if config.is_local() { "local" } else { "hosted" }
    );

    let (backend, auth) = config.connect(&deployment).await?;
    let tracker = Tracker::new(backend, deployment.clone());
    let channels = config.review_channels(&deployment);
    let review = Arc::new(ReviewService::new(tracker.clone(), channels));

    let mut lifecycle = LifecycleManager::new().await?;
    if review.channel_names().is_empty() {
        warn!("No review channel configured; weekly review job disabled");
    } else {
        job::schedule(&lifecycle.scheduler, &config.review_cron, review.clone()).await?;
    }

    let api = ApiServer::new(ApiServerConfig {
        tracker,
        auth,
        review: review.clone(),
        log_tx,
        api_host: config.host.clone(),
        api_port: config.port,
        allowed_origins: vec![config.base_url.trim_end_matches('/').to_string()],
    });
    lifecycle.attach(Arc::new(Mutex::new(api)));
    lifecycle.start().await?;
    info!("Lifecycle state: {:?}", lifecycle.state());

    let channels = review.channel_names().join(", ");
    GuideSection::new(&deployment.display_name)
        .status(
            "API",
            &format!(
                "{}",
                style(format!("http://{}", config.bind_addr())).underlined().cyan()
            ),
        )
        .status("Frontend", &config.base_url)
        .status(
            "Weekly review",
            &if channels.is_empty() {
                "disabled".to_string()
            } else {
                format!("{} via {}", config.review_cron, channels)
            },
        )
        .blank()
        .status(
            "Press Ctrl+C to stop.",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    Ok(())
}
