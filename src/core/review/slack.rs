use serde_json::{Value, json};

use super::{DatedProgram, WeeklyReview};

const TITLE: &str = "📊 週次番組レビュー";

fn section(text: String) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text }
    })
}

fn program_lines(heading: &str, items: &[DatedProgram]) -> String {
    let mut text = heading.to_string();
    for item in items {
        text.push_str(&format!(
            "\n• {} {} {}",
            item.date, item.program.program_id, item.program.title
        ));
    }
    text
}

/// Block Kit payload for an incoming webhook. Empty sections are left out.
pub fn slack_message(review: &WeeklyReview) -> Value {
    let mut blocks = vec![json!({
        "type": "header",
        "text": { "type": "plain_text", "text": TITLE, "emoji": true }
    })];

    if review.has_schedule() {
        blocks.push(section("*📅 今週の予定*".to_string()));
    }
    if !review.broadcasts.is_empty() {
        blocks.push(section(program_lines("📢 *放送予定*", &review.broadcasts)));
    }
    if !review.recordings.is_empty() {
        blocks.push(section(program_lines("📍 *収録予定*", &review.recordings)));
    }
    if !review.tasks.is_empty() {
        let mut text = String::from("📝 *タスク予定*");
        for t in &review.tasks {
            text.push_str(&format!("\n• {} {}", t.date, t.task.task_type));
            if let Some(program) = &t.program {
                text.push_str(&format!(" ({})", program.program_id));
            }
        }
        blocks.push(section(text));
    }

    if !review.status_summary.is_empty() {
        let mut text = String::from("*📊 番組状況*");
        for c in &review.status_summary {
            text.push_str(&format!("\n• {}: {}件", c.status, c.count));
        }
        blocks.push(section(text));
    }
    if !review.new_programs.is_empty() {
        let mut text = String::from("🆕 *新規番組*");
        for p in &review.new_programs {
            text.push_str(&format!("\n• {} {}", p.program_id, p.title));
        }
        blocks.push(section(text));
    }
    if !review.status_changes.is_empty() {
        let mut text = String::from("🔄 *ステータス変更*");
        for c in &review.status_changes {
            let code = c.episode_code.as_deref().unwrap_or("-");
            let title = c.title.as_deref().unwrap_or("");
            let from = c.old_status.as_deref().unwrap_or("-");
            text.push_str(&format!("\n• {} {}: {} → {}", code, title, from, c.new_status));
            if let Some(reason) = &c.change_reason {
                text.push_str(&format!(" (理由: {})", reason));
            }
        }
        blocks.push(section(text));
    }

    json!({ "text": TITLE, "blocks": blocks })
}
