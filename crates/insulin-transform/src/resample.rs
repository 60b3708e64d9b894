//! Nearest-neighbour resampling onto the grid.
//!
//! Each grid point takes the closest sample within the tolerance, or nothing.
//! With a tolerance below half an interval, no sample can be claimed by two
//! grid points.

use chrono::{NaiveDateTime, TimeDelta};
use insulin_model::{BasalRateEvent, CgmEvent, TieBreak};

use crate::grid::GridSeries;

/// A timestamped value reduced from any stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl From<&BasalRateEvent> for Sample {
    fn from(event: &BasalRateEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            value: event.rate,
        }
    }
}

impl From<&CgmEvent> for Sample {
    fn from(event: &CgmEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            value: event.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resampled {
    /// One entry per grid point.
    pub values: Vec<Option<f64>>,
    /// Grid points where two samples were equally close.
    pub ties: usize,
}

/// Join `samples` (sorted by timestamp) onto `grid`.
pub fn resample_nearest(
    grid: &GridSeries,
    samples: &[Sample],
    tolerance: TimeDelta,
    tie_break: TieBreak,
) -> Resampled {
    let mut values = Vec::with_capacity(grid.len());
    let mut ties = 0;
    // First sample at or after the current grid point.
    let mut next = 0;

    for &point in grid.points() {
        while next < samples.len() && samples[next].timestamp < point {
            next += 1;
        }
        let before = next
            .checked_sub(1)
            .map(|idx| samples[idx])
            .filter(|sample| point - sample.timestamp <= tolerance);
        let after = samples
            .get(next)
            .copied()
            .filter(|sample| sample.timestamp - point <= tolerance);

        let chosen = match (before, after) {
            (None, None) => None,
            (Some(sample), None) | (None, Some(sample)) => Some(sample),
            (Some(earlier), Some(later)) => {
                let to_earlier = point - earlier.timestamp;
                let to_later = later.timestamp - point;
                if to_earlier < to_later {
                    Some(earlier)
                } else if to_later < to_earlier {
                    Some(later)
                } else {
                    ties += 1;
                    match tie_break {
                        TieBreak::PreferEarlier => Some(earlier),
                        TieBreak::PreferLater => Some(later),
                    }
                }
            }
        };
        values.push(chosen.map(|sample| sample.value));
    }

    Resampled { values, ties }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::build_grid;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn sample(ts: NaiveDateTime, value: f64) -> Sample {
        Sample {
            timestamp: ts,
            value,
        }
    }

    fn value_at(grid: &GridSeries, resampled: &Resampled, ts: NaiveDateTime) -> Option<f64> {
        resampled.values[grid.index_of(ts).unwrap()]
    }

    #[test]
    fn test_within_tolerance_is_joined() {
        let samples = [sample(at(10, 2, 29), 120.0), sample(at(10, 12, 30), 130.0)];
        let grid = build_grid(&[at(10, 0, 0)]).unwrap();
        let resampled = resample_nearest(
            &grid,
            &samples,
            TimeDelta::seconds(149),
            TieBreak::PreferEarlier,
        );
        assert_eq!(value_at(&grid, &resampled, at(10, 0, 0)), Some(120.0));
        assert_eq!(value_at(&grid, &resampled, at(10, 5, 0)), None);
        // 150 s away from both 10:10 and 10:15.
        assert_eq!(value_at(&grid, &resampled, at(10, 10, 0)), None);
        assert_eq!(value_at(&grid, &resampled, at(10, 15, 0)), None);
        assert_eq!(resampled.values.iter().flatten().count(), 1);
    }

    #[test]
    fn test_nearest_sample_wins() {
        let samples = [sample(at(9, 59, 0), 1.0), sample(at(10, 0, 30), 2.0)];
        let grid = build_grid(&[at(10, 0, 0)]).unwrap();
        let resampled =
            resample_nearest(&grid, &samples, TimeDelta::seconds(149), TieBreak::PreferEarlier);
        assert_eq!(value_at(&grid, &resampled, at(10, 0, 0)), Some(2.0));
        assert_eq!(resampled.ties, 0);
    }

    #[test]
    fn test_tie_break_is_explicit() {
        let samples = [sample(at(9, 59, 0), 1.0), sample(at(10, 1, 0), 2.0)];
        let grid = build_grid(&[at(10, 0, 0)]).unwrap();

        let earlier =
            resample_nearest(&grid, &samples, TimeDelta::seconds(149), TieBreak::PreferEarlier);
        assert_eq!(value_at(&grid, &earlier, at(10, 0, 0)), Some(1.0));
        assert_eq!(earlier.ties, 1);

        let later =
            resample_nearest(&grid, &samples, TimeDelta::seconds(149), TieBreak::PreferLater);
        assert_eq!(value_at(&grid, &later, at(10, 0, 0)), Some(2.0));
    }

    #[test]
    fn test_aligned_series_is_unchanged() {
        let grid = build_grid(&[at(0, 0, 0)]).unwrap();
        let samples: Vec<Sample> = grid
            .points()
            .iter()
            .enumerate()
            .map(|(idx, ts)| sample(*ts, idx as f64))
            .collect();
        let resampled =
            resample_nearest(&grid, &samples, TimeDelta::seconds(149), TieBreak::PreferEarlier);
        let expected: Vec<Option<f64>> = samples.iter().map(|s| Some(s.value)).collect();
        assert_eq!(resampled.values, expected);
    }
}
