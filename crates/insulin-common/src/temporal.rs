//! Datetime and duration parsing for device exports.
//!
//! Pump and CGM exports spell timestamps in several ways. Values without a
//! time component are read as midnight.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse a device timestamp.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use insulin_common::parse_device_datetime;
///
/// let expected = NaiveDate::from_ymd_opt(2023, 1, 1)
///     .unwrap()
///     .and_hms_opt(20, 3, 0)
///     .unwrap();
/// assert_eq!(parse_device_datetime("01/01/2023 8:03:00 PM"), Some(expected));
/// assert_eq!(parse_device_datetime("2023-01-01 20:03:00"), Some(expected));
/// assert_eq!(parse_device_datetime("not a date"), None);
/// ```
pub fn parse_device_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    // Date-only values in the same export mean midnight.
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Parse a delivery duration.
///
/// Accepts `H:MM:SS` (hours may exceed 24) or a plain number of seconds.
/// Negative and malformed values yield `None`.
pub fn parse_duration(value: &str) -> Option<TimeDelta> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(':') {
        let mut parts = trimmed.split(':');
        let hours = parts.next()?.trim().parse::<u32>().ok()?;
        let minutes = parts.next()?.trim().parse::<u32>().ok()?;
        let seconds = parts.next()?.trim().parse::<f64>().ok()?;
        if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
            return None;
        }
        let millis = (seconds * 1000.0).round() as i64;
        return Some(
            TimeDelta::hours(i64::from(hours))
                + TimeDelta::minutes(i64::from(minutes))
                + TimeDelta::milliseconds(millis),
        );
    }
    let seconds = trimmed.parse::<f64>().ok()?;
    seconds_to_duration(seconds)
}

/// Convert a non-negative number of seconds into a duration.
pub fn seconds_to_duration(seconds: f64) -> Option<TimeDelta> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(TimeDelta::milliseconds((seconds * 1000.0).round() as i64))
}
