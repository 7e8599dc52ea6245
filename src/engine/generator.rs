// src/engine/generator.rs

use chrono::{Datelike, Days, NaiveDate};

use crate::clock;
use crate::error::{EngineError, EngineResult};
use crate::models::ScheduledInstance;

/// Weekdays are numbered 0 (Sunday) to 6 (Saturday).
pub const MAX_WEEKDAY: u32 = 6;

/// Upper bound on instances a single assignment may require.
pub const MAX_TOTAL_INSTANCES: i32 = 1000;

/// Walk forward from `start` (inclusive) and emit one instance on every day
/// whose weekday is selected, until `total` instances exist.
///
/// Gives up with [`EngineError::Generation`] after `total * 7 + 30` days
/// without reaching the target.
pub fn try_generate(
    start: NaiveDate,
    total: i32,
    weekdays: &[u32],
    time: Option<&str>,
) -> EngineResult<Vec<ScheduledInstance>> {
    if total <= 0 {
        return Err(EngineError::validation(
            "total instances must be greater than zero",
        ));
    }
    if total > MAX_TOTAL_INSTANCES {
        return Err(EngineError::validation(format!(
            "total instances must not exceed {MAX_TOTAL_INSTANCES}"
        )));
    }
    if weekdays.is_empty() {
        return Err(EngineError::validation("select at least one weekday"));
    }
    if let Some(bad) = weekdays.iter().find(|d| **d > MAX_WEEKDAY) {
        return Err(EngineError::validation(format!(
            "weekday {bad} is out of range 0..=6"
        )));
    }

    let time = time
        .filter(|t| !clock::is_unspecified(Some(*t)))
        .map(|t| t.trim().to_string());
    let wanted = total as usize;
    let scan_limit = total as u64 * 7 + 30;

    let mut out = Vec::with_capacity(wanted);
    for offset in 0..scan_limit {
        let Some(day) = start.checked_add_days(Days::new(offset)) else {
            break;
        };
        if weekdays.contains(&day.weekday().num_days_from_sunday()) {
            out.push(ScheduledInstance::new(day, time.clone()));
            if out.len() == wanted {
                return Ok(out);
            }
        }
    }

    Err(EngineError::Generation(format!(
        "only {} of {total} instances found within {scan_limit} days of {start}",
        out.len()
    )))
}

/// Empty when the inputs are unusable; callers treat that as invalid input.
#[cfg(test)]
pub fn generate(
    start: NaiveDate,
    total: i32,
    weekdays: &[u32],
    time: Option<&str>,
) -> Vec<ScheduledInstance> {
    try_generate(start, total, weekdays, time).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::day;

    #[test]
    fn mondays_and_wednesdays_from_a_monday() {
        let out = generate(day("2024-06-03"), 3, &[1, 3], Some("09:00"));
        assert_eq!(
            out,
            vec![
                ScheduledInstance::new(day("2024-06-03"), Some("09:00".into())),
                ScheduledInstance::new(day("2024-06-05"), Some("09:00".into())),
                ScheduledInstance::new(day("2024-06-10"), Some("09:00".into())),
            ]
        );
    }

    #[test]
    fn every_date_matches_and_strictly_increases() {
        let start = day("2024-02-27");
        let out = generate(start, 12, &[0, 5], None);
        assert_eq!(out.len(), 12);
        assert!(out[0].date >= start);
        for pair in out.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
        for inst in &out {
            assert!([0, 5].contains(&inst.date.weekday().num_days_from_sunday()));
            assert_eq!(inst.time, None);
        }
    }

    #[test]
    fn same_inputs_same_output() {
        let a = generate(day("2024-06-03"), 5, &[2], Some("14:30"));
        let b = generate(day("2024-06-03"), 5, &[2], Some("14:30"));
        assert_eq!(a, b);
    }

    #[test]
    fn unusable_inputs_yield_nothing() {
        assert!(generate(day("2024-06-03"), 0, &[1], None).is_empty());
        assert!(generate(day("2024-06-03"), 3, &[], None).is_empty());
        assert!(matches!(
            try_generate(day("2024-06-03"), 3, &[7], None),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn oversized_totals_are_rejected_up_front() {
        assert!(matches!(
            try_generate(day("2024-06-03"), i32::MAX, &[1], None),
            Err(EngineError::Validation(_))
        ));
        assert!(generate(day("2024-06-03"), MAX_TOTAL_INSTANCES + 1, &[1], None).is_empty());
        assert_eq!(
            generate(day("2024-06-03"), MAX_TOTAL_INSTANCES, &[1], None).len(),
            MAX_TOTAL_INSTANCES as usize
        );
    }

    #[test]
    fn unspecified_time_is_dropped() {
        let out = generate(day("2024-06-03"), 1, &[1], Some("N/D"));
        assert_eq!(out[0].time, None);
    }

    #[test]
    fn hitting_the_end_of_the_calendar_is_a_generation_failure() {
        assert!(matches!(
            try_generate(NaiveDate::MAX, 2, &[0, 1, 2, 3, 4, 5, 6], None),
            Err(EngineError::Generation(_))
        ));
    }
}
