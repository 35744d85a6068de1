use std::fmt::Write as _;

use super::{DatedProgram, WeeklyReview};
use crate::core::dates;

pub fn email_subject(review: &WeeklyReview) -> String {
    format!(
        "週次レビュー - {}〜{}",
        dates::format_md(review.window.start),
        dates::format_md(review.window.end)
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn label(raw: &str) -> String {
    dates::parse_date(raw)
        .map(dates::format_ja)
        .unwrap_or_else(|| escape(raw))
}

fn open_section(html: &mut String, title: &str) {
    let _ = write!(
        html,
        r#"<div style="margin-bottom:24px"><h2 style="font-size:16px;color:#1f2937;border-bottom:2px solid #e5e7eb;padding-bottom:6px">{}</h2><ul style="padding-left:20px;color:#374151">"#,
        title
    );
}

fn close_section(html: &mut String) {
    html.push_str("</ul></div>");
}

fn program_section(html: &mut String, title: &str, items: &[DatedProgram]) {
    if items.is_empty() {
        return;
    }
    open_section(html, title);
    for item in items {
        let _ = write!(
            html,
            "<li><strong>{}</strong> {} {}</li>",
            label(&item.date),
            escape(&item.program.program_id),
            escape(&item.program.title)
        );
    }
    close_section(html);
}

/// Full HTML body. Every piece of record text goes through `escape`.
pub fn email_html(review: &WeeklyReview, display_name: &str, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"></head><body style="font-family:sans-serif;background:#f9fafb;margin:0;padding:24px"><div style="max-width:640px;margin:0 auto;background:#ffffff;border-radius:12px;overflow:hidden"><div style="background:linear-gradient(135deg,#667eea 0%,#764ba2 100%);color:#ffffff;padding:24px"><h1 style="margin:0;font-size:22px">📊 週次レビュー</h1><p style="margin:8px 0 0">{}〜{} の活動報告</p></div><div style="padding:24px">"#,
        dates::format_md(review.window.start),
        dates::format_md(review.window.end)
    );

    let _ = write!(
        html,
        r#"<p style="margin:0 0 24px"><a href="{base}/calendar">📅 カレンダー</a> | <a href="{base}/kanban">📋 進捗すごろく</a> | <a href="{base}/episodes">📺 エピソード一覧</a></p>"#,
        base = escape(base)
    );

    program_section(&mut html, "📢 放送予定", &review.broadcasts);
    program_section(&mut html, "📍 収録予定", &review.recordings);

    if !review.tasks.is_empty() {
        open_section(&mut html, "📝 タスク予定");
        for t in &review.tasks {
            let _ = write!(
                html,
                "<li><strong>{}</strong> {}",
                label(&t.date),
                escape(&t.task.task_type)
            );
            if let Some(program) = &t.program {
                let _ = write!(
                    html,
                    " ({} {})",
                    escape(&program.program_id),
                    escape(&program.title)
                );
            }
            html.push_str("</li>");
        }
        close_section(&mut html);
    }

    if !review.status_summary.is_empty() {
        open_section(&mut html, "📊 番組状況");
        for c in &review.status_summary {
            let _ = write!(html, "<li>{}: {}件</li>", escape(&c.status), c.count);
        }
        close_section(&mut html);
    }

    if !review.new_programs.is_empty() {
        open_section(&mut html, "🆕 新規番組");
        for p in &review.new_programs {
            let _ = write!(
                html,
                "<li>{} {}</li>",
                escape(&p.program_id),
                escape(&p.title)
            );
        }
        close_section(&mut html);
    }

    if !review.status_changes.is_empty() {
        open_section(&mut html, "🔄 ステータス変更");
        for c in &review.status_changes {
            let _ = write!(
                html,
                "<li>{} {}: {} → {}",
                escape(c.episode_code.as_deref().unwrap_or("-")),
                escape(c.title.as_deref().unwrap_or("")),
                escape(c.old_status.as_deref().unwrap_or("-")),
                escape(&c.new_status)
            );
            if let Some(reason) = &c.change_reason {
                let _ = write!(html, " (理由: {})", escape(reason));
            }
            html.push_str("</li>");
        }
        close_section(&mut html);
    }

    if !review.has_schedule() {
        html.push_str(
            r#"<p style="color:#6b7280">今週の予定はありません。カレンダーにタスクを登録しておきましょう。</p>"#,
        );
    }

    let _ = write!(
        html,
        r#"</div><div style="background:#f3f4f6;padding:16px;text-align:center;color:#6b7280;font-size:12px"><p style="margin:0">このレビューは自動生成されています</p><p style="margin:4px 0 0">{} - Program Management System</p></div></div></body></html>"#,
        escape(display_name)
    );
    html
}
