mod doctor;
mod import;
mod review;
mod serve;
mod watch;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::Overrides;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner("Program Management");

    GuideSection::new("Core")
        .command("serve", "Start the API server and the weekly review job")
        .command("watch", "Follow live episode counts per stage")
        .print();

    GuideSection::new("Data")
        .command("import", "Import episodes from a CSV file")
        .command("review", "Build and send the weekly review")
        .print();

    GuideSection::new("Diagnostics")
        .command("doctor", "Check configuration and backend access")
        .print();

    GuideSection::new("Options")
        .text("--app <pmlibrary|pmplatto>   Deployment preset (env PMBOARD_APP)")
        .text("--local <path>               Use a local SQLite database (env PMBOARD_LOCAL_DB)")
        .text("--host <addr> --port <n>     API bind address for serve")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("pmboard").green()
    );
}

/// `--app` and `--local`, accepted by every command.
pub(crate) fn parse_backend_flags(args: &[String], start: usize) -> Overrides {
    let mut overrides = Overrides::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--app" | "-a" => {
                if i + 1 < args.len() {
                    overrides.app = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--local" | "-l" => {
                if i + 1 < args.len() {
                    overrides.local = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    overrides
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut overrides: Overrides,
) -> Overrides {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    overrides.port = args[i + 1].parse().ok().or(overrides.port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    overrides.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    overrides
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReviewArgs {
    pub now: bool,
    pub dry_run: bool,
    pub date: Option<String>,
}

pub(crate) fn parse_review_flags(args: &[String], start: usize) -> ReviewArgs {
    let mut parsed = ReviewArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--now" => {
                parsed.now = true;
                i += 1;
            }
            "--dry-run" => {
                parsed.dry_run = true;
                i += 1;
            }
            "--date" => {
                if i + 1 < args.len() {
                    parsed.date = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    parsed
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ImportArgs {
    pub path: Option<PathBuf>,
    pub replace: bool,
}

/// First bare argument is the CSV path; values of known flags are skipped.
pub(crate) fn parse_import_args(args: &[String], start: usize) -> ImportArgs {
    let mut parsed = ImportArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--replace" => {
                parsed.replace = true;
                i += 1;
            }
            "--app" | "-a" | "--local" | "-l" => i += 2,
            other => {
                if parsed.path.is_none() && !other.starts_with('-') {
                    parsed.path = Some(PathBuf::from(other));
                }
                i += 1;
            }
        }
    }
    parsed
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    match cmd {
        "serve" => {
            let overrides = parse_api_server_flags(&args, 2, parse_backend_flags(&args, 2));
            serve::run_serve(overrides).await
        }
        "review" => {
            let overrides = parse_backend_flags(&args, 2);
            review::run_review_command(overrides, parse_review_flags(&args, 2)).await
        }
        "import" => {
            let parsed = parse_import_args(&args, 2);
            let Some(path) = parsed.path else {
                GuideSection::new("pmboard import")
                    .text("Import episodes from a CSV file.")
                    .blank()
                    .text("--replace    Delete every existing episode first")
                    .blank()
                    .hint("pmboard import episodes.csv", "")
                    .hint("pmboard import episodes.csv --replace --local ./pm.db", "")
                    .print();
                println!();
                return Ok(());
            };
            import::run_import(parse_backend_flags(&args, 2), path, parsed.replace).await
        }
        "doctor" => doctor::run_doctor(parse_backend_flags(&args, 2)).await,
        "watch" => watch::run_watch(parse_backend_flags(&args, 2)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_backend_flags_reads_app_and_local() {
        let args = argv(&["pmboard", "doctor", "--app", "pmplatto", "--local", "/tmp/pm.db"]);
        let overrides = parse_backend_flags(&args, 2);
        assert_eq!(overrides.app.as_deref(), Some("pmplatto"));
        assert_eq!(overrides.local, Some(PathBuf::from("/tmp/pm.db")));
        assert!(overrides.host.is_none());
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = argv(&["pmboard", "serve", "--host", "0.0.0.0", "--port", "9000"]);
        let overrides = parse_api_server_flags(&args, 2, Overrides::default());
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.port, Some(9000));
    }

    #[test]
    fn unparseable_port_is_ignored() {
        let args = argv(&["pmboard", "serve", "--port", "eighty"]);
        let overrides = parse_api_server_flags(&args, 2, Overrides::default());
        assert_eq!(overrides.port, None);
    }

    #[test]
    fn parse_review_flags_reads_switches() {
        let args = argv(&["pmboard", "review", "--now", "--dry-run", "--date", "2024-04-10"]);
        let parsed = parse_review_flags(&args, 2);
        assert!(parsed.now);
        assert!(parsed.dry_run);
        assert_eq!(parsed.date.as_deref(), Some("2024-04-10"));
    }

    #[test]
    fn parse_import_args_skips_flag_values() {
        let args = argv(&["pmboard", "import", "--local", "pm.db", "eps.csv", "--replace"]);
        let parsed = parse_import_args(&args, 2);
        assert_eq!(parsed.path, Some(PathBuf::from("eps.csv")));
        assert!(parsed.replace);
    }
}
