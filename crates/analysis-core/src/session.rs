//! US equity session calendar (regular hours, weekends only; exchange holidays are not modeled).

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::US::Eastern;

pub const REGULAR_CLOSE_MINUTES: u32 = 16 * 60;

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn next_trading_day(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while !is_trading_day(next) {
        next += Duration::days(1);
    }
    next
}

/// Walk forward `n` trading days. `n == 0` returns the date itself.
pub fn add_trading_days(date: NaiveDate, n: u32) -> NaiveDate {
    (0..n).fold(date, |d, _| next_trading_day(d))
}

/// The regular-session close (16:00 New York time) of `date`, in UTC.
pub fn regular_close(date: NaiveDate) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(REGULAR_CLOSE_MINUTES / 60, REGULAR_CLOSE_MINUTES % 60, 0)
        .unwrap_or_default();
    match Eastern.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // 16:00 never falls in a DST gap; fall back to EST offset anyway
        None => Utc.from_utc_datetime(&naive) + Duration::hours(5),
    }
}

pub fn is_session_closed(date: NaiveDate, now: DateTime<Utc>) -> bool {
    now >= regular_close(date)
}

/// The session date a timestamp belongs to, in New York time.
pub fn session_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Eastern).date_naive()
}
