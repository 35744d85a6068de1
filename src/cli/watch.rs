use anyhow::Result;
use console::style;
use std::sync::Arc;

use crate::core::config::{AppConfig, Overrides};
use crate::core::models::Episode;
use crate::core::pipeline::Deployment;
use crate::core::sync::Synced;
use crate::core::terminal::{GuideSection, print_info, print_warn};

fn stage_counts(deployment: &Deployment, episodes: &[Episode]) -> Vec<(String, usize)> {
    deployment
        .stages
        .iter()
        .map(|stage| {
            let n = episodes
                .iter()
                .filter(|e| &e.current_status == stage)
                .count();
            (stage.clone(), n)
        })
        .collect()
}

fn print_counts(deployment: &Deployment, episodes: &[Episode]) {
    let mut section = GuideSection::new(&format!("{} episodes", episodes.len()));
    for (stage, n) in stage_counts(deployment, episodes) {
        let count = if n == 0 {
            style(n.to_string()).dim().to_string()
        } else {
            style(n.to_string()).bold().to_string()
        };
        section = section.status(&stage, &count);
    }
    section.print();
    println!();
}

pub async fn run_watch(overrides: Overrides) -> Result<()> {
    let config = AppConfig::from_env(overrides)?;
    let deployment = Arc::new(config.deployment()?);
    let (backend, _) = config.connect(&deployment).await?;

    let synced: Synced<Episode> = Synced::start(backend, &deployment.episode_table, Vec::new()).await;
    let mut changes = synced.changes();
    print_info(&format!(
        "Watching {} (Ctrl+C to stop)",
        style(synced.table()).cyan()
    ));

    loop {
        if let Some(err) = synced.last_error().await {
            print_warn(&err);
        }
        print_counts(&deployment, &synced.rows().await);

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
