use anyhow::Result;

use crate::core::backend::{Query, schema};
use crate::core::config::{AppConfig, BackendConfig, Overrides};
use crate::core::terminal::{
    GuideSection, print_error, print_info, print_step, print_success, print_warn,
};

/// Walks configuration, deployment and backend in order and reports each.
/// Returns an error only when a later check cannot run at all.
pub async fn run_doctor(overrides: Overrides) -> Result<()> {
    print_step("Checking configuration...");
    println!();

    // 1. Environment
    let config = match AppConfig::from_env(overrides) {
        Ok(config) => {
            print_success(&format!("Deployment preset: {}", config.app));
            config
        }
        Err(e) => {
            print_error(&e.to_string());
            return Ok(());
        }
    };
    match &config.backend {
        BackendConfig::Hosted { url, .. } => print_success(&format!("Hosted backend: {}", url)),
        BackendConfig::Local { path } => {
            print_success(&format!("Local backend: {}", path.display()))
        }
    }

    // 2. Deployment record
    let deployment = match config.deployment() {
        Ok(d) => d,
        Err(e) => {
            print_error(&e.to_string());
            return Ok(());
        }
    };
    if let Err(e) = deployment.validate() {
        print_error(&e.to_string());
        return Ok(());
    }
    print_success(&format!(
        "{} stages, {} program stages, episode table '{}'",
        deployment.stages.len(),
        deployment.program_stages.len(),
        deployment.episode_table
    ));
    if let Some(path) = &config.deployment_file {
        print_info(&format!("Deployment loaded from {}", path.display()));
    }

    // 3. Backend access per table
    println!();
    print_step("Checking backend access...");
    println!();
    let (backend, _) = match config.connect(&deployment).await {
        Ok(pair) => pair,
        Err(e) => {
            print_error(&format!("Could not open backend: {}", e));
            return Ok(());
        }
    };
    print_info(&format!("Connected to {} backend", backend.name()));
    let first_row = Query::new().limit(1);
    let mut reachable = 0;
    let tables = schema(&deployment.episode_table);
    for table in &tables {
        match backend.select(&table.name, &first_row).await {
            Ok(_) => {
                reachable += 1;
                print_success(&format!("{} is readable", table.name));
            }
            Err(e) => print_error(&format!("{}: {}", table.name, e)),
        }
    }

    // 4. Review channels
    println!();
    let channels = config.review_channels(&deployment);
    if channels.is_empty() {
        print_warn("No review channel configured (SLACK_WEBHOOK_URL or RESEND_API_KEY/EMAIL_DOMAIN/REVIEW_EMAIL)");
    } else {
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        print_success(&format!("Review channels: {}", names.join(", ")));
    }

    println!();
    GuideSection::new("Summary")
        .status("Backend", &format!("{}/{} tables readable", reachable, tables.len()))
        .status("Review schedule", &config.review_cron)
        .status("API bind", &config.bind_addr())
        .print();
    println!();
    Ok(())
}
