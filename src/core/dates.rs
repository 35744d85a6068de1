use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Asia::Tokyo;
use serde::Serialize;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const JA_WEEKDAYS: [&str; 7] = ["日", "月", "火", "水", "木", "金", "土"];

pub fn today_jst() -> NaiveDate {
    Utc::now().with_timezone(&Tokyo).date_naive()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses `YYYY-MM-DD`, or the date part of a longer timestamp string.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Calendar day in Tokyo for a stored timestamp. Falls back to the leading
/// date when the value is not RFC 3339.
pub fn jst_date_of(timestamp: &str) -> Option<NaiveDate> {
    match DateTime::parse_from_rfc3339(timestamp.trim()) {
        Ok(ts) => Some(ts.with_timezone(&Tokyo).date_naive()),
        Err(_) => parse_date(timestamp),
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// `M月d日(E)`
pub fn format_ja(date: NaiveDate) -> String {
    let weekday = JA_WEEKDAYS[date.weekday().num_days_from_sunday() as usize];
    format!("{}月{}日({})", date.month(), date.day(), weekday)
}

/// `M月d日`
pub fn format_md(date: NaiveDate) -> String {
    format!("{}月{}日", date.month(), date.day())
}

/// Moves `weeks_before` weeks back from `air`, snaps to `weekday` inside that
/// Sunday-start week, and steps one more week back if the result is not
/// strictly before `air`.
pub(crate) fn deadline_before(air: NaiveDate, weeks_before: i64, weekday: Weekday) -> NaiveDate {
    let base = air - Duration::weeks(weeks_before);
    let shift =
        weekday.num_days_from_sunday() as i64 - base.weekday().num_days_from_sunday() as i64;
    let mut date = base + Duration::days(shift);
    if date >= air {
        date -= Duration::weeks(1);
    }
    date
}

/// Delivery deadline: Tuesday of the week before first air.
pub fn complete_date(air: NaiveDate) -> NaiveDate {
    deadline_before(air, 1, Weekday::Tue)
}

/// PR deadline: Monday two weeks before first air.
pub fn pr_due_date(air: NaiveDate) -> NaiveDate {
    deadline_before(air, 2, Weekday::Mon)
}

/// Monday-start review week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub last_week_start: NaiveDate,
}

impl WeekWindow {
    pub fn containing(day: NaiveDate) -> Self {
        let start = day - Duration::days(day.weekday().num_days_from_monday() as i64);
        Self {
            start,
            end: start + Duration::days(6),
            last_week_start: start - Duration::weeks(1),
        }
    }

    pub fn current() -> Self {
        Self::containing(today_jst())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// From the start of last week through the end of this week.
    pub fn contains_recent(&self, date: NaiveDate) -> bool {
        date >= self.last_week_start && date <= self.end
    }
}

/// Sunday-start weeks from the first of `month` through the end of the
/// following month. `None` for an invalid month or one at the edge of the
/// representable date range.
pub fn month_grid(year: i32, month: u32) -> Option<Vec<[NaiveDate; 7]>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    let (after_year, after_month) = if next_month == 12 {
        (next_year.checked_add(1)?, 1)
    } else {
        (next_year, next_month + 1)
    };
    let last = NaiveDate::from_ymd_opt(after_year, after_month, 1)?
        .checked_sub_signed(Duration::days(1))?;

    let lead = Duration::days(first.weekday().num_days_from_sunday() as i64);
    let mut cursor = first.checked_sub_signed(lead)?;
    let mut weeks = Vec::new();
    while cursor <= last {
        let mut week = [cursor; 7];
        for (offset, slot) in week.iter_mut().enumerate() {
            *slot = cursor.checked_add_signed(Duration::days(offset as i64))?;
        }
        weeks.push(week);
        cursor = cursor.checked_add_signed(Duration::weeks(1))?;
    }
    Some(weeks)
}
