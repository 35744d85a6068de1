use anyhow::{Result, anyhow, bail};
use std::sync::Arc;

use super::ReviewArgs;
use crate::core::config::{AppConfig, Overrides};
use crate::core::dates::{self, WeekWindow};
use crate::core::review::{ReviewRun, ReviewService};
use crate::core::terminal::{GuideSection, print_error, print_info, print_step, print_success};
use crate::core::tracker::Tracker;

pub async fn run_review_command(overrides: Overrides, args: ReviewArgs) -> Result<()> {
    let config = AppConfig::from_env(overrides)?;
    config.require_channel()?;
    let deployment = Arc::new(config.deployment()?);
    let channels = config.review_channels(&deployment);

    if !args.now {
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        GuideSection::new("Weekly review")
            .status("Schedule", &config.review_cron)
            .status("Channels", &names.join(", "))
            .blank()
            .hint("pmboard review --now", "send this week's review")
            .hint("pmboard review --now --dry-run", "print the payloads only")
            .print();
        println!();
        return Ok(());
    }

    let window = match args.date.as_deref() {
        Some(raw) => WeekWindow::containing(
            dates::parse_date(raw).ok_or_else(|| anyhow!("invalid --date '{}'", raw))?,
        ),
        None => WeekWindow::current(),
    };

    let _log_tx = crate::logging::init(false);
    let (backend, _) = config.connect(&deployment).await?;
    let service = ReviewService::new(Tracker::new(backend, deployment), channels);

    print_step(&format!(
        "Building review for {}〜{}",
        dates::format_md(window.start),
        dates::format_md(window.end)
    ));
    let run = service.run(window, args.dry_run).await?;
    report(&run)
}

fn report(run: &ReviewRun) -> Result<()> {
    let review = &run.review;
    GuideSection::new("Review")
        .status("Broadcasts", &review.broadcasts.len().to_string())
        .status("Recordings", &review.recordings.len().to_string())
        .status("Tasks", &review.tasks.len().to_string())
        .status("New programs", &review.new_programs.len().to_string())
        .status("Status changes", &review.status_changes.len().to_string())
        .print();
    println!();

    if run.dry_run {
        for outcome in &run.outcomes {
            print_info(&format!("{} payload:", outcome.channel));
            if let Some(payload) = &outcome.payload {
                println!("{}", serde_json::to_string_pretty(payload)?);
            }
        }
        return Ok(());
    }

    for outcome in &run.outcomes {
        match &outcome.error {
            None => print_success(&format!("Sent via {}", outcome.channel)),
            Some(e) => print_error(&format!("{} failed: {}", outcome.channel, e)),
        }
    }
    if !run.all_delivered() {
        bail!("weekly review was not delivered on every channel");
    }
    Ok(())
}
