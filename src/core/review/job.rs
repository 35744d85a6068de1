//! Scheduled weekly digest.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use super::ReviewService;
use crate::core::dates::WeekWindow;

/// Monday 08:00 in Tokyo, expressed in UTC.
pub const DEFAULT_CRON: &str = "0 0 23 * * Sun";

pub fn build_job(cron: &str, service: Arc<ReviewService>) -> Result<Job> {
    Job::new_async(cron, move |_uuid, mut _l| {
        let service = service.clone();
        Box::pin(async move {
            match service.run(WeekWindow::current(), false).await {
                Ok(run) if run.all_delivered() => info!("Scheduled weekly review delivered"),
                Ok(run) => {
                    let failed: Vec<_> = run
                        .outcomes
                        .iter()
                        .filter(|o| !o.delivered)
                        .map(|o| o.channel)
                        .collect();
                    error!("Scheduled weekly review failed for {:?}", failed);
                }
                Err(e) => error!("Scheduled weekly review aborted: {}", e),
            }
        })
    })
    .with_context(|| format!("Invalid cron expression '{}'", cron))
}

pub async fn schedule(
    scheduler: &JobScheduler,
    cron: &str,
    service: Arc<ReviewService>,
) -> Result<Uuid> {
    let job = build_job(cron, service)?;
    let id = scheduler.add(job).await?;
    info!("Weekly review scheduled ({})", cron);
    Ok(id)
}
