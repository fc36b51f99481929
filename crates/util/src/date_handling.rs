//! # Date Handling Utilities
//!
//! Formatting of storage timestamps for the admin views: an absolute date,
//! a relative "3 days ago" hint, and the day deltas shown between history rows.

use chrono::{Local, NaiveDateTime};
use hymie_types::Timestamp;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// Pretty prints a timestamp relative to the current local time.
///
/// # Example
/// ```rust
/// use hymie_util::pprint_timestamp;
///
/// let timestamp = "20200314_092653".parse().unwrap();
/// assert!(pprint_timestamp(timestamp).starts_with("2020-03-14 09:26 ("));
/// ```
pub fn pprint_timestamp(timestamp: Timestamp) -> String {
    pprint_timestamp_at(timestamp, Local::now().naive_local())
}

/// Pretty prints a timestamp as `YYYY-MM-DD HH:MM (<relative>)`.
///
/// # Arguments
/// * `timestamp` - The timestamp to display
/// * `now` - Reference point for the relative part
pub fn pprint_timestamp_at(timestamp: Timestamp, now: NaiveDateTime) -> String {
    let datetime = timestamp.as_datetime();
    format!("{} ({})", datetime.format("%Y-%m-%d %H:%M"), humanize(datetime, now))
}

/// Describes the distance between two instants in words.
///
/// Past instants read "5 minutes ago", future ones "in 5 minutes".
pub fn humanize(instant: NaiveDateTime, now: NaiveDateTime) -> String {
    let seconds = (now - instant).num_seconds();
    let distance = seconds.abs();

    let phrase = if distance < 10 {
        return "just now".to_string();
    } else if distance < 45 {
        "seconds".to_string()
    } else if distance < 90 {
        "a minute".to_string()
    } else if distance < 45 * MINUTE {
        format!("{} minutes", (distance + MINUTE / 2) / MINUTE)
    } else if distance < 90 * MINUTE {
        "an hour".to_string()
    } else if distance < DAY {
        format!("{} hours", (distance + HOUR / 2) / HOUR)
    } else if distance < 2 * DAY {
        "a day".to_string()
    } else if distance < MONTH {
        format!("{} days", distance / DAY)
    } else if distance < 2 * MONTH {
        "a month".to_string()
    } else if distance < YEAR {
        format!("{} months", distance / MONTH)
    } else if distance < 2 * YEAR {
        "a year".to_string()
    } else {
        format!("{} years", distance / YEAR)
    };

    if seconds >= 0 { format!("{phrase} ago") } else { format!("in {phrase}") }
}

/// Absolute date used in the history table.
pub fn format_history_datetime(timestamp: Timestamp) -> String {
    timestamp.as_datetime().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Suffix describing whole days elapsed since the previous history row.
///
/// The first row has no predecessor and therefore no suffix.
pub fn history_delta_label(previous: Option<Timestamp>, current: Timestamp) -> String {
    match previous {
        Some(previous) => {
            let days = (current.as_datetime() - previous.as_datetime()).num_days();
            format!(" (+{days} days)")
        }
        None => String::new(),
    }
}
