//! TTL helpers for calendar-aligned expiry, computed in UTC.
//!
//! Each helper has a `*_from` variant taking the reference instant so the
//! arithmetic can be exercised without the clock.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

fn seconds_between(now: DateTime<Utc>, target: Option<NaiveDateTime>) -> u64 {
    target
        .map(|t| (t.and_utc() - now).num_seconds().max(0) as u64)
        .unwrap_or(0)
}

fn start_of(date: Option<NaiveDate>) -> Option<NaiveDateTime> {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Seconds until the next 00:00.
pub fn seconds_until_midnight() -> u64 {
    seconds_until_midnight_from(Utc::now())
}

pub fn seconds_until_midnight_from(now: DateTime<Utc>) -> u64 {
    seconds_between(now, start_of(now.date_naive().succ_opt()))
}

/// Seconds until 00:00 on the coming Monday; a full week when called on a
/// Monday.
pub fn seconds_until_next_monday() -> u64 {
    seconds_until_next_monday_from(Utc::now())
}

pub fn seconds_until_next_monday_from(now: DateTime<Utc>) -> u64 {
    let days = 7 - i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive().checked_add_signed(Duration::days(days));
    seconds_between(now, start_of(monday))
}

/// Seconds until 00:00 on the first day of next month.
pub fn seconds_until_next_month() -> u64 {
    seconds_until_next_month_from(Utc::now())
}

pub fn seconds_until_next_month_from(now: DateTime<Utc>) -> u64 {
    let (year, month) = match now.month() {
        12 => (now.year() + 1, 1),
        m => (now.year(), m + 1),
    };
    seconds_between(now, start_of(NaiveDate::from_ymd_opt(year, month, 1)))
}
