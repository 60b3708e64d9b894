//! Polars AnyValue utility functions.
//!
//! This module provides helper functions for working with Polars `AnyValue` types,
//! converting cells of canonical input frames into strings, numbers, timestamps
//! and durations.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use polars::prelude::{AnyValue, TimeUnit};

use crate::temporal::{parse_device_datetime, parse_duration, seconds_to_duration};

/// Converts a Polars `AnyValue` to a `String` representation.
///
/// Returns an empty string for `Null`. Integral floats drop their fraction so
/// that numeric patient identifiers read back as `"12"` rather than `"12.0"`.
///
/// # Examples
///
/// ```
/// use polars::prelude::AnyValue;
/// use insulin_common::any_to_string;
///
/// assert_eq!(any_to_string(AnyValue::Null), "");
/// assert_eq!(any_to_string(AnyValue::Int64(42)), "42");
/// assert_eq!(any_to_string(AnyValue::Float64(7.0)), "7");
/// assert_eq!(any_to_string(AnyValue::String("pt-1")), "pt-1");
/// ```
pub fn any_to_string(value: AnyValue<'_>) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::Int8(v) => v.to_string(),
        AnyValue::Int16(v) => v.to_string(),
        AnyValue::Int32(v) => v.to_string(),
        AnyValue::Int64(v) => v.to_string(),
        AnyValue::UInt8(v) => v.to_string(),
        AnyValue::UInt16(v) => v.to_string(),
        AnyValue::UInt32(v) => v.to_string(),
        AnyValue::UInt64(v) => v.to_string(),
        AnyValue::Float32(v) => format_numeric(f64::from(v)),
        AnyValue::Float64(v) => format_numeric(v),
        AnyValue::String(s) => s.trim().to_string(),
        AnyValue::StringOwned(s) => s.trim().to_string(),
        AnyValue::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn format_numeric(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Converts an `AnyValue` to `f64`, returning `None` for non-numeric or null values.
///
/// Handles integer types, floating-point types, and string parsing.
pub fn any_to_f64(value: AnyValue<'_>) -> Option<f64> {
    match value {
        AnyValue::Null => None,
        AnyValue::Int8(v) => Some(f64::from(v)),
        AnyValue::Int16(v) => Some(f64::from(v)),
        AnyValue::Int32(v) => Some(f64::from(v)),
        AnyValue::Int64(v) => Some(v as f64),
        AnyValue::UInt8(v) => Some(f64::from(v)),
        AnyValue::UInt16(v) => Some(f64::from(v)),
        AnyValue::UInt32(v) => Some(f64::from(v)),
        AnyValue::UInt64(v) => Some(v as f64),
        AnyValue::Float32(v) => Some(f64::from(v)),
        AnyValue::Float64(v) => Some(v),
        AnyValue::String(s) => parse_f64(s),
        AnyValue::StringOwned(s) => parse_f64(&s),
        _ => None,
    }
}

/// Parses a string as `f64`, returning `None` for invalid or empty strings.
pub fn parse_f64(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Converts an `AnyValue` to a naive timestamp.
///
/// Temporal columns are converted directly; string cells go through
/// [`parse_device_datetime`].
pub fn any_to_datetime(value: AnyValue<'_>) -> Option<NaiveDateTime> {
    match value {
        AnyValue::Datetime(v, unit, _) => timestamp_to_naive(v, unit),
        AnyValue::Date(days) => {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
            let date = epoch.checked_add_signed(TimeDelta::days(i64::from(days)))?;
            Some(date.and_time(NaiveTime::MIN))
        }
        AnyValue::String(s) => parse_device_datetime(s),
        AnyValue::StringOwned(s) => parse_device_datetime(&s),
        _ => None,
    }
}

fn timestamp_to_naive(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let utc = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::<Utc>::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::<Utc>::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::<Utc>::from_timestamp_millis(value),
    };
    utc.map(|datetime| datetime.naive_utc())
}

/// Converts an `AnyValue` to a duration.
///
/// Duration columns are converted directly, numbers are read as seconds and
/// strings go through [`parse_duration`]. Null means "no duration" and maps to
/// zero; negative values yield `None`.
pub fn any_to_duration(value: AnyValue<'_>) -> Option<TimeDelta> {
    match value {
        AnyValue::Null => Some(TimeDelta::zero()),
        AnyValue::Duration(v, unit) => {
            let delta = match unit {
                TimeUnit::Nanoseconds => TimeDelta::nanoseconds(v),
                TimeUnit::Microseconds => TimeDelta::microseconds(v),
                TimeUnit::Milliseconds => TimeDelta::milliseconds(v),
            };
            (delta >= TimeDelta::zero()).then_some(delta)
        }
        AnyValue::String(s) if s.trim().is_empty() => Some(TimeDelta::zero()),
        AnyValue::String(s) => parse_duration(s),
        AnyValue::StringOwned(s) if s.trim().is_empty() => Some(TimeDelta::zero()),
        AnyValue::StringOwned(s) => parse_duration(&s),
        other => any_to_f64(other).and_then(seconds_to_duration),
    }
}

/// Converts an `AnyValue` to a flag.
pub fn any_to_bool(value: AnyValue<'_>) -> Option<bool> {
    match value {
        AnyValue::Boolean(b) => Some(b),
        AnyValue::String(s) => parse_bool(s),
        AnyValue::StringOwned(s) => parse_bool(&s),
        other => any_to_f64(other).map(|number| number != 0.0),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}
