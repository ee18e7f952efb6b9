//! MATLAB serial date numbers, as used on the legacy model's time axes.
//!
//! Day 1 is 0000-01-01 (proleptic Gregorian); the fractional part is the time of day.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Error, Result};

/// Offset between `num_days_from_ce` (0001-01-01 = 1) and MATLAB's day 1.
const DATENUM_OFFSET: i64 = 366;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// MATLAB datenum of a timestamp.
pub fn datetime_to_datenum(t: NaiveDateTime) -> f64 {
    let days = t.date().num_days_from_ce() as i64 + DATENUM_OFFSET;
    let secs = t.time().num_seconds_from_midnight() as f64
        + t.time().nanosecond() as f64 * 1e-9;
    days as f64 + secs / SECONDS_PER_DAY
}

/// Timestamp of a MATLAB datenum, rounded to the nearest second.
pub fn datenum_to_datetime(datenum: f64) -> Result<NaiveDateTime> {
    let invalid = || Error::InvalidParameter {
        name: "datenum",
        value: datenum.to_string(),
        reason: "outside the representable calendar range".into(),
    };
    if !datenum.is_finite() {
        return Err(invalid());
    }
    let day = datenum.floor();
    let secs = ((datenum - day) * SECONDS_PER_DAY).round() as i64;
    let ce_days = i32::try_from(day as i64 - DATENUM_OFFSET).map_err(|_| invalid())?;
    let date = NaiveDate::from_num_days_from_ce_opt(ce_days).ok_or_else(invalid)?;
    Ok(date.and_time(chrono::NaiveTime::MIN) + Duration::seconds(secs))
}

/// Datenums of a whole time axis.
pub fn datenums(times: &[NaiveDateTime]) -> Vec<f64> {
    times.iter().copied().map(datetime_to_datenum).collect()
}
