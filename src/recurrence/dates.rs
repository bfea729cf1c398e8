//! Pure calendar arithmetic on immutable `NaiveDate` values.
//!
//! Every helper returns `None` instead of panicking when a date would fall
//! outside chrono's representable range.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, TimeZone, Utc};

/// `date` shifted by `days`
pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::try_days(days)?)
}

/// `date` shifted by `months`, clamped to the last day of the target month
pub fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

/// First day of the month `months` after the month of `date`
pub fn first_of_month_after(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.checked_add_months(Months::new(months))
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    Some(next.signed_duration_since(first).num_days() as u32)
}

/// `year-month-day`, with `day` clamped to the month length
pub fn ymd_clamped(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

/// Weekday index with Sunday = 0
pub fn weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

/// Days from `from` forward to the next date with weekday `target` (0 if same)
fn days_until_weekday(from: u32, target: u32) -> u32 {
    (target + 7 - from) % 7
}

/// The `n`th (1-based) `weekday` of a month.
///
/// When the month has fewer than `n` such weekdays the last one is returned.
pub fn nth_weekday_of_month(year: i32, month: u32, weekday: u32, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let first_match = add_days(
        first,
        days_until_weekday(weekday_index(first), weekday) as i64,
    )?;
    let candidate = add_days(first_match, 7 * (n.max(1) as i64 - 1))?;
    if candidate.month() == month {
        Some(candidate)
    } else {
        last_weekday_of_month(year, month, weekday)
    }
}

/// The last `weekday` of a month
pub fn last_weekday_of_month(year: i32, month: u32, weekday: u32) -> Option<NaiveDate> {
    let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)?)?;
    let back = days_until_weekday(weekday, weekday_index(last));
    add_days(last, -(back as i64))
}

/// Next midnight strictly after `now` in the `offset` zone, as UTC
pub fn next_local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    local_date
        .succ_opt()
        .and_then(|d| local_start_of(d, offset))
        .unwrap_or_else(|| now + Duration::days(1))
}

/// Midnight of the first day of the next month in the `offset` zone, as UTC
pub fn first_of_next_month(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    first_of_month_after(local_date, 1)
        .and_then(|d| local_start_of(d, offset))
        .unwrap_or_else(|| now + Duration::days(31))
}

fn local_start_of(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
