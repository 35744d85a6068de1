use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::config::{AppConfig, Overrides};
use crate::core::terminal::{GuideSection, print_step, print_success, print_warn};
use crate::core::tracker::Tracker;

pub async fn run_import(overrides: Overrides, path: PathBuf, replace: bool) -> Result<()> {
    let config = AppConfig::from_env(overrides)?;
    let deployment = Arc::new(config.deployment()?);
    let csv = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let _log_tx = crate::logging::init(false);
    let (backend, _) = config.connect(&deployment).await?;
    let tracker = Tracker::new(backend, deployment);

    print_step(&format!(
        "Importing {} into {}{}",
        path.display(),
        tracker.episode_table(),
        if replace { " (replacing existing rows)" } else { "" }
    ));
    let report = tracker.import_episodes(&csv, replace).await?;

    let mut section = GuideSection::new("Import")
        .status("Parsed", &report.parsed.to_string())
        .status("Inserted", &report.inserted.to_string());
    if replace {
        section = section.status("Cleared", &report.cleared.to_string());
    }
    for skipped in &report.skipped {
        section = section.warn(&format!("line {}: {}", skipped.line, skipped.message));
    }
    section.print();
    println!();

    if report.failed_batches > 0 {
        print_warn(&format!(
            "{} batch(es) with {} row(s) were rejected by the backend",
            report.failed_batches, report.failed_rows
        ));
    }
    if report.inserted == 0 && report.parsed > 0 {
        bail!("no rows were imported");
    }
    print_success(&format!("Imported {} episode(s)", report.inserted));
    Ok(())
}
