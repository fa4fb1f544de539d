use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::Interval;

/// Next eligible time for an interval schedule, anchored at `now`.
///
/// Always computed from `now`, never from the previous eligible time, so a
/// missed tick shifts the schedule forward instead of causing catch-up bursts.
/// Monthly arithmetic clamps the day-of-month to the last valid day of the
/// target month (Jan 31 + 1 month = Feb 28/29), evaluated in the configured
/// timezone so month boundaries land where the operator expects them.
pub fn next_after(now: DateTime<Utc>, interval: Interval, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let next = match interval {
        Interval::Daily => local + Duration::days(1),
        Interval::Weekly => local + Duration::days(7),
        Interval::Monthly => add_one_month_clamped(local),
    };
    next.with_timezone(&Utc)
}

fn add_one_month_clamped(dt: DateTime<Tz>) -> DateTime<Tz> {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    let day = dt.day().min(days_in_month(year, month));

    let naive = match NaiveDate::from_ymd_opt(year, month, day) {
        Some(d) => d.and_time(dt.time()),
        None => return dt + Duration::days(30),
    };
    match dt.timezone().from_local_datetime(&naive).earliest() {
        Some(next) => next,
        // Local time falls in a DST gap; resolve it as if it were UTC.
        None => dt.timezone().from_utc_datetime(&naive),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Returns YYYY-MM-DD in the configured timezone.
pub fn day_key(tz: &str) -> Result<String> {
    let tz: Tz = tz.parse().map_err(|_| anyhow!("invalid tz: {tz}"))?;
    let now = Utc::now().with_timezone(&tz);
    Ok(format!(
        "{:04}-{:02}-{:02}",
        now.year(),
        now.month(),
        now.day()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::UTC;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn daily_and_weekly_anchor_at_now() {
        let now = utc(2025, 3, 10, 14);
        assert_eq!(next_after(now, Interval::Daily, UTC), utc(2025, 3, 11, 14));
        assert_eq!(next_after(now, Interval::Weekly, UTC), utc(2025, 3, 17, 14));
    }

    #[test]
    fn monthly_clamps_jan_31_to_end_of_february() {
        let now = utc(2025, 1, 31, 9);
        assert_eq!(next_after(now, Interval::Monthly, UTC), utc(2025, 2, 28, 9));

        let leap = utc(2024, 1, 31, 9);
        assert_eq!(next_after(leap, Interval::Monthly, UTC), utc(2024, 2, 29, 9));
    }

    #[test]
    fn monthly_wraps_december_into_january() {
        let now = utc(2025, 12, 15, 0);
        assert_eq!(next_after(now, Interval::Monthly, UTC), utc(2026, 1, 15, 0));
    }

    #[test]
    fn monthly_keeps_day_when_valid() {
        let now = utc(2025, 4, 30, 12);
        assert_eq!(next_after(now, Interval::Monthly, UTC), utc(2025, 5, 30, 12));
    }
}
