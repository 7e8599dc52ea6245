// src/clock.rs

use std::cmp::Ordering;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

/// Display value for a visit without a time of day.
pub const NOT_SPECIFIED: &str = "N/D";

const LAST_MINUTE_OF_DAY: u32 = 23 * 60 + 59;

/// Source of "now" and "today" for the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Parse a strict `HH:MM` string into minutes after midnight.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let bytes = value.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    if ![0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit()) {
        return None;
    }

    let hours: u32 = value[0..2].parse().ok()?;
    let minutes: u32 = value[3..5].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

pub fn is_valid_hhmm(value: &str) -> bool {
    parse_hhmm(value).is_some()
}

pub fn format_hhmm(minutes: u32) -> String {
    let minutes = minutes.min(LAST_MINUTE_OF_DAY);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

pub fn hhmm_of(now: NaiveDateTime) -> String {
    format_hhmm(now.hour() * 60 + now.minute())
}

/// Minutes between two `HH:MM` strings; 0 when either is malformed or the
/// end is not after the start.
pub fn duration_minutes(start: &str, end: &str) -> i32 {
    match (parse_hhmm(start), parse_hhmm(end)) {
        (Some(s), Some(e)) if e > s => (e - s) as i32,
        _ => 0,
    }
}

/// `start + minutes`, never past 23:59 of the same day.
pub fn add_minutes_clamped(start: u32, minutes: i32) -> u32 {
    let end = start as i64 + minutes.max(0) as i64;
    end.min(LAST_MINUTE_OF_DAY as i64) as u32
}

pub fn is_unspecified(time: Option<&str>) -> bool {
    match time.map(str::trim) {
        None => true,
        Some(t) => t.is_empty() || t == NOT_SPECIFIED,
    }
}

/// Display form of an optional time.
pub fn display_time(time: Option<&str>) -> String {
    if is_unspecified(time) {
        NOT_SPECIFIED.to_string()
    } else {
        time.unwrap_or(NOT_SPECIFIED).trim().to_string()
    }
}

/// Ascending time order with unspecified times last.
pub fn compare_times(a: &str, b: &str) -> Ordering {
    match (is_unspecified(Some(a)), is_unspecified(Some(b))) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}

#[cfg(test)]
pub struct FixedClock(pub NaiveDateTime);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_strict_hhmm() {
        assert_eq!(parse_hhmm("09:05"), Some(545));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("9:05"), None);
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("ab:cd"), None);
        assert_eq!(parse_hhmm(NOT_SPECIFIED), None);
    }

    #[test]
    fn duration_is_never_negative() {
        assert_eq!(duration_minutes("10:00", "10:30"), 30);
        assert_eq!(duration_minutes("10:30", "10:00"), 0);
        assert_eq!(duration_minutes("10:00", "10:00"), 0);
        assert_eq!(duration_minutes("10:00", "N/D"), 0);
        assert_eq!(duration_minutes("bad", "11:00"), 0);
    }

    #[test]
    fn end_time_clamps_at_midnight() {
        let start = parse_hhmm("23:30").unwrap();
        assert_eq!(format_hhmm(add_minutes_clamped(start, 60)), "23:59");
        assert_eq!(format_hhmm(add_minutes_clamped(600, 45)), "10:45");
    }

    #[test]
    fn unspecified_times_sort_last() {
        assert_eq!(compare_times("08:00", "N/D"), Ordering::Less);
        assert_eq!(compare_times("N/D", "08:00"), Ordering::Greater);
        assert_eq!(compare_times("", "N/D"), Ordering::Equal);
        assert_eq!(compare_times("09:00", "08:30"), Ordering::Greater);
    }
}
