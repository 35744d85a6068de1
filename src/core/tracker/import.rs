//! Bulk episode import from the production spreadsheet's CSV export.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::{Tracker, TrackerResult};
use crate::core::backend::Filter;
use crate::core::models::{NewEpisode, to_row};
use crate::core::pipeline::Deployment;

pub const COLUMNS: [&str; 13] = [
    "episode_id",
    "title",
    "episode_type",
    "season",
    "episode_number",
    "current_status",
    "director",
    "due_date",
    "script_url",
    "guest_name",
    "recording_date",
    "recording_location",
    "material_status",
];

pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 1-based line number in the file, header included.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub parsed: usize,
    pub inserted: usize,
    pub cleared: usize,
    pub skipped: Vec<RowError>,
    pub failed_batches: usize,
    pub failed_rows: usize,
}

/// Splits one CSV line. Quotes group commas and `""` is a literal quote.
pub fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

fn count_or_one(raw: &str) -> Value {
    Value::from(raw.trim().parse::<i64>().ok().filter(|n| *n > 0).unwrap_or(1))
}

fn episode_from_cells(cells: &[String], deployment: &Deployment) -> Result<NewEpisode, String> {
    let mut map = Map::new();
    for (column, cell) in COLUMNS.iter().zip(cells) {
        let cell = cell.trim();
        let value = match *column {
            "season" | "episode_number" => count_or_one(cell),
            _ if cell.is_empty() => Value::Null,
            _ => Value::from(cell),
        };
        map.insert(column.to_string(), value);
    }
    for required in ["episode_id", "title"] {
        if map.get(required).is_none_or(Value::is_null) {
            map.insert(required.to_string(), Value::from(""));
        }
    }
    let new: NewEpisode = serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())?;
    new.normalize(deployment).map_err(|e| e.to_string())
}

/// Parses the file into valid rows and per-line rejections.
pub fn parse_episodes(
    csv: &str,
    deployment: &Deployment,
) -> (Vec<(usize, NewEpisode)>, Vec<RowError>) {
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (index, line) in csv.lines().enumerate().skip(1) {
        let line_no = index + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let cells = split_line(line);
        if cells.len() != COLUMNS.len() {
            errors.push(RowError {
                line: line_no,
                message: format!("expected {} columns, found {}", COLUMNS.len(), cells.len()),
            });
            continue;
        }
        match episode_from_cells(&cells, deployment) {
            Ok(episode) => rows.push((line_no, episode)),
            Err(message) => errors.push(RowError {
                line: line_no,
                message,
            }),
        }
    }
    (rows, errors)
}

impl Tracker {
    pub async fn import_episodes(&self, csv: &str, replace: bool) -> TrackerResult<ImportReport> {
        let (rows, skipped) = parse_episodes(csv, self.deployment());
        for row in &skipped {
            warn!("Skipping line {}: {}", row.line, row.message);
        }
        let mut report = ImportReport {
            parsed: rows.len(),
            skipped,
            ..Default::default()
        };

        if replace {
            let removed = self
                .backend
                .delete(self.episode_table(), &[Filter::gte("id", 0)])
                .await?;
            report.cleared = removed.len();
            info!("Cleared {} existing episodes", report.cleared);
        }

        for batch in rows.chunks(BATCH_SIZE) {
            let mut payload = Vec::with_capacity(batch.len());
            for (_, episode) in batch {
                payload.push(to_row(episode)?);
            }
            match self.backend.insert(self.episode_table(), payload).await {
                Ok(inserted) => report.inserted += inserted.len(),
                Err(e) => {
                    let first = batch.first().map(|(line, _)| *line).unwrap_or_default();
                    error!("Batch starting at line {} failed: {}", first, e);
                    report.failed_batches += 1;
                    report.failed_rows += batch.len();
                }
            }
        }
        info!(
            "Imported {} of {} episodes into {}",
            report.inserted,
            report.parsed,
            self.episode_table()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::Query;
    use crate::core::tracker::test_support::tracker;

    const HEADER: &str = "episode_id,title,episode_type,season,episode_number,current_status,director,due_date,script_url,guest_name,recording_date,recording_location,material_status";

    #[test]
    fn quoted_cells_keep_commas_and_escaped_quotes() {
        let cells = split_line(r#"LA-INT001,"対談, 前編","He said ""hi""",,"#);
        assert_eq!(
            cells,
            vec!["LA-INT001", "対談, 前編", "He said \"hi\"", "", ""]
        );
    }

    #[test]
    fn parse_reports_bad_rows_with_line_numbers() {
        let deployment = Deployment::preset("pmlibrary").unwrap();
        let csv = format!(
            "{HEADER}\n\
             LA-INT001,インタビュー,interview,1,1,,山田,2024-05-01,,佐藤,,,\n\
             LA-VTR001,ロケ,vtr,x,2,編集中,,,,,,,△\n\
             too,few\n\
             LA-VTR002,ロケ2,drama,1,3,,,,,,,,\n\
             LA-INT002,,interview,1,4,,,,,,,,\n"
        );
        let (rows, errors) = parse_episodes(&csv, &deployment);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1.current_status.as_deref(), Some("台本作成中"));
        assert_eq!(rows[0].1.script_url, None);
        assert_eq!(rows[1].1.season, 1);
        let lines: Vec<_> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn import_batches_and_replace_clears_first() {
        let tracker = tracker("pmlibrary");
        let mut csv = String::from(HEADER);
        for n in 1..=23 {
            csv.push_str(&format!("\nLA-INT{n:03},回{n},interview,1,{n},,,,,,,,"));
        }
        let report = tracker.import_episodes(&csv, false).await.unwrap();
        assert_eq!(report.inserted, 23);
        assert_eq!(report.failed_batches, 0);

        let report = tracker.import_episodes(&csv, true).await.unwrap();
        assert_eq!(report.cleared, 23);
        assert_eq!(report.inserted, 23);
        let stored = tracker
            .backend()
            .select(tracker.episode_table(), &Query::new())
            .await
            .unwrap();
        assert_eq!(stored.len(), 23);
    }
}
