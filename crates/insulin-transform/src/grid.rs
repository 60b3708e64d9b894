//! Canonical 5-minute grid.
//!
//! A patient's grid runs from midnight of the first event's day to midnight
//! after the last event's day, exclusive. Slot rounding works relative to
//! midnight; a day holds an even number of slots, so the parity used for
//! half-to-even ties is the same as relative to the epoch.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use insulin_model::{EmptySeriesError, GRID_INTERVAL_MINUTES};

const INTERVAL_MS: i64 = GRID_INTERVAL_MINUTES * 60 * 1000;

pub fn grid_interval() -> TimeDelta {
    TimeDelta::minutes(GRID_INTERVAL_MINUTES)
}

pub fn floor_to_midnight(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date().and_time(NaiveTime::MIN)
}

fn offset_from_midnight_ms(ts: NaiveDateTime) -> i64 {
    (ts - floor_to_midnight(ts)).num_milliseconds()
}

/// Latest grid boundary at or before `ts`.
pub fn floor_to_grid(ts: NaiveDateTime) -> NaiveDateTime {
    let offset = offset_from_midnight_ms(ts);
    floor_to_midnight(ts) + TimeDelta::milliseconds(offset - offset % INTERVAL_MS)
}

/// Nearest grid boundary; exact midpoints go to the even slot.
///
/// ```
/// use chrono::NaiveDate;
/// use insulin_transform::grid::round_to_grid;
///
/// let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
/// let at = |h, m, s| day.and_hms_opt(h, m, s).unwrap();
/// assert_eq!(round_to_grid(at(10, 8, 30)), at(10, 10, 0));
/// assert_eq!(round_to_grid(at(10, 2, 29)), at(10, 0, 0));
/// // 10:02:30 sits between slot 120 (10:00) and slot 121 (10:05).
/// assert_eq!(round_to_grid(at(10, 2, 30)), at(10, 0, 0));
/// // 10:07:30 sits between slot 121 and slot 122 (10:10).
/// assert_eq!(round_to_grid(at(10, 7, 30)), at(10, 10, 0));
/// ```
pub fn round_to_grid(ts: NaiveDateTime) -> NaiveDateTime {
    let offset = offset_from_midnight_ms(ts);
    let slot = offset / INTERVAL_MS;
    let remainder = offset % INTERVAL_MS;
    let rounded = match (2 * remainder).cmp(&INTERVAL_MS) {
        Ordering::Less => slot,
        Ordering::Greater => slot + 1,
        Ordering::Equal if slot % 2 == 0 => slot,
        Ordering::Equal => slot + 1,
    };
    floor_to_midnight(ts) + TimeDelta::milliseconds(rounded * INTERVAL_MS)
}

/// Ordered, gap-free grid timestamps over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSeries {
    start: NaiveDateTime,
    end: NaiveDateTime,
    points: Vec<NaiveDateTime>,
}

impl GridSeries {
    /// Grid covering whole days `first_day..=last_day`.
    pub fn for_days(first_day: NaiveDate, last_day: NaiveDate) -> Self {
        let start = first_day.and_time(NaiveTime::MIN);
        let end = last_day.and_time(NaiveTime::MIN) + TimeDelta::days(1);
        let mut points = Vec::new();
        let mut current = start;
        while current < end {
            points.push(current);
            current += grid_interval();
        }
        Self { start, end, points }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn points(&self) -> &[NaiveDateTime] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points `[start, end)` must hold.
    pub fn expected_len(&self) -> usize {
        let span = (self.end - self.start).num_milliseconds();
        usize::try_from(span / INTERVAL_MS).unwrap_or(0)
    }

    /// Index of the grid point exactly at `ts`.
    pub fn index_of(&self, ts: NaiveDateTime) -> Option<usize> {
        if ts < self.start || ts >= self.end {
            return None;
        }
        let offset = (ts - self.start).num_milliseconds();
        if offset % INTERVAL_MS != 0 {
            return None;
        }
        usize::try_from(offset / INTERVAL_MS).ok()
    }

    /// Index of the interval containing `ts`.
    pub fn slot_of(&self, ts: NaiveDateTime) -> Option<usize> {
        self.index_of(floor_to_grid(ts))
    }

    /// True when points are exactly `start, start + 5min, …, end - 5min`.
    pub fn is_contiguous(&self) -> bool {
        self.points.len() == self.expected_len()
            && self.points.first().is_none_or(|first| *first == self.start)
            && self
                .points
                .windows(2)
                .all(|pair| pair[1] - pair[0] == grid_interval())
    }
}

/// Build the grid spanning `timestamps`, which need not be sorted.
pub fn build_grid(timestamps: &[NaiveDateTime]) -> Result<GridSeries, EmptySeriesError> {
    let first = timestamps.iter().min().ok_or(EmptySeriesError)?;
    let last = timestamps.iter().max().ok_or(EmptySeriesError)?;
    Ok(GridSeries::for_days(first.date(), last.date()))
}
