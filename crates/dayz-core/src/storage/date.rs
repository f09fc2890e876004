//! Local calendar dates for the daily journal files

use core::fmt::Write as _;

use chrono::{DateTime, Datelike, Days, NaiveDate};
use heapless::String;

const SECS_PER_DAY: i64 = 86_400;

/// Local calendar date of a unix timestamp
pub fn local_date(timestamp: u32, utc_offset_secs: i32) -> NaiveDate {
    let local = i64::from(timestamp) + i64::from(utc_offset_secs);
    DateTime::from_timestamp(local, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

/// Unix timestamp of local midnight starting `date`
pub fn local_midnight(date: NaiveDate, utc_offset_secs: i32) -> i64 {
    let days = i64::from(date.num_days_from_ce() - 719_163);
    days * SECS_PER_DAY - i64::from(utc_offset_secs)
}

/// `YYYYMMDD.JSL`
pub fn day_file_name(date: NaiveDate) -> String<12> {
    let mut name = String::new();
    let _ = write!(
        name,
        "{:04}{:02}{:02}.JSL",
        date.year(),
        date.month(),
        date.day()
    );
    name
}

/// `YYYY-MM-DD`, as written in the journal header
pub fn iso_date(date: NaiveDate) -> String<10> {
    let mut text = String::new();
    let _ = write!(
        text,
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month(),
        date.day()
    );
    text
}

pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days))
        .unwrap_or(NaiveDate::MIN)
}

/// Every date from `first` to `last` inclusive
pub fn date_range(first: NaiveDate, last: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut next = (first <= last).then_some(first);
    core::iter::from_fn(move || {
        let current = next?;
        next = current.succ_opt().filter(|d| *d <= last);
        Some(current)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    // 2024-11-05 00:00:00 UTC
    const NOV_5_UTC: u32 = 1_730_764_800;

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_local_date_uses_offset() {
        let before_midnight = NOV_5_UTC - 1;
        assert_eq!(
            local_date(before_midnight, 0),
            ymd(2024, 11, 4)
        );
        // 23:59:59 UTC is already the next day in CET
        assert_eq!(
            local_date(before_midnight, 3600),
            ymd(2024, 11, 5)
        );
    }

    #[test]
    fn test_local_midnight_round_trip() {
        let date = local_date(NOV_5_UTC + 5000, 3600);
        assert_eq!(local_midnight(date, 3600), i64::from(NOV_5_UTC) - 3600);
        assert_eq!(local_midnight(date, 0), i64::from(NOV_5_UTC));
    }

    #[test]
    fn test_file_names() {
        let date = ymd(2024, 1, 9);
        assert_eq!(day_file_name(date).as_str(), "20240109.JSL");
        assert_eq!(iso_date(date).as_str(), "2024-01-09");
    }

    #[test]
    fn test_date_range_inclusive() {
        let first = ymd(2024, 2, 28);
        let last = ymd(2024, 3, 1);
        let dates: Vec<NaiveDate> = date_range(first, last).collect();
        assert_eq!(dates.len(), 3, "2024 is a leap year");
        assert_eq!(date_range(last, first).count(), 0);
    }
}
