//! Next-occurrence strategies, one per frequency.

use chrono::{Datelike, NaiveDate};

use super::dates::{
    add_days, add_months, first_of_month_after, last_weekday_of_month, nth_weekday_of_month,
    weekday_index, ymd_clamped,
};
use crate::error::{AppError, AppResult};
use crate::models::{Frequency, RecurrencePattern};

/// Computes the occurrence that follows `current` under `pattern`.
///
/// The result is always strictly later than `current`.
pub fn compute_next_occurrence(
    current: NaiveDate,
    pattern: &RecurrencePattern,
) -> AppResult<NaiveDate> {
    if pattern.interval < 1 {
        return Err(AppError::Validation(
            "interval must be at least 1".to_string(),
        ));
    }

    let next = match pattern.frequency {
        Frequency::Daily => next_daily(current, pattern),
        Frequency::Weekly => next_weekly(current, pattern),
        Frequency::Monthly => next_monthly(current, pattern),
        Frequency::Yearly => next_yearly(current, pattern),
    };

    next.ok_or_else(|| {
        AppError::Validation(format!(
            "{} recurrence after {} leaves the supported calendar range",
            pattern.frequency, current
        ))
    })
}

fn next_daily(current: NaiveDate, pattern: &RecurrencePattern) -> Option<NaiveDate> {
    add_days(current, pattern.interval as i64)
}

fn next_weekly(current: NaiveDate, pattern: &RecurrencePattern) -> Option<NaiveDate> {
    let interval = pattern.interval as i64;
    if pattern.by_day.is_empty() {
        return add_days(current, 7 * interval);
    }

    let today = weekday_index(current) as i64;
    let mut targets: Vec<i64> = pattern.by_day.iter().map(|d| d.index() as i64).collect();
    targets.sort_unstable();

    if let Some(later) = targets.iter().find(|&&t| t > today) {
        return add_days(current, later - today);
    }

    let first = targets[0];
    add_days(current, 7 - today + first + 7 * (interval - 1))
}

fn next_monthly(current: NaiveDate, pattern: &RecurrencePattern) -> Option<NaiveDate> {
    if !pattern.by_month_day.is_empty() {
        return next_monthly_by_month_day(current, pattern);
    }

    if let (Some(pos), Some(day)) = (pattern.by_set_pos, pattern.by_day.first()) {
        let month = first_of_month_after(current, pattern.interval)?;
        return if pos == -1 {
            last_weekday_of_month(month.year(), month.month(), day.index())
        } else {
            nth_weekday_of_month(month.year(), month.month(), day.index(), pos.max(1) as u32)
        };
    }

    add_months(current, pattern.interval)
}

fn next_monthly_by_month_day(current: NaiveDate, pattern: &RecurrencePattern) -> Option<NaiveDate> {
    let mut days = pattern.by_month_day.clone();
    days.sort_unstable();

    let later_this_month = days
        .iter()
        .filter(|&&d| d > current.day())
        .find_map(|&d| NaiveDate::from_ymd_opt(current.year(), current.month(), d));
    if let Some(date) = later_this_month {
        return Some(date);
    }

    let month = first_of_month_after(current, pattern.interval)?;
    ymd_clamped(month.year(), month.month(), days[0])
}

fn next_yearly(current: NaiveDate, pattern: &RecurrencePattern) -> Option<NaiveDate> {
    if pattern.by_month.is_empty() {
        return add_months(current, pattern.interval.checked_mul(12)?);
    }

    let mut months = pattern.by_month.clone();
    months.sort_unstable();

    let (year, month) = match months.iter().find(|&&m| m > current.month()) {
        Some(&m) => (current.year(), m),
        None => (
            current.year().checked_add(pattern.interval.try_into().ok()?)?,
            months[0],
        ),
    };

    match (pattern.by_set_pos, pattern.by_day.first()) {
        (Some(-1), Some(day)) => last_weekday_of_month(year, month, day.index()),
        (Some(pos), Some(day)) => nth_weekday_of_month(year, month, day.index(), pos.max(1) as u32),
        _ => ymd_clamped(year, month, current.day()),
    }
}
