//! Bounded forward fill for grid-resampled rates.

use chrono::TimeDelta;
use insulin_model::BasalGridPoint;

use crate::grid::{GridSeries, grid_interval};

/// Carry the last known value forward while it is younger than `limit`.
///
/// Elapsed time is measured from the grid point of the last non-null value;
/// a point is filled only when that elapsed time is strictly below `limit`.
/// Longer gaps stay null.
pub fn bounded_forward_fill(values: &[Option<f64>], limit: TimeDelta) -> Vec<Option<f64>> {
    let step = grid_interval();
    let mut last: Option<(usize, f64)> = None;
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| match value {
            Some(value) => {
                last = Some((idx, *value));
                Some(*value)
            }
            None => last.and_then(|(seen, value)| {
                let elapsed = step * i32::try_from(idx - seen).unwrap_or(i32::MAX);
                (elapsed < limit).then_some(value)
            }),
        })
        .collect()
}

/// Units delivered over one grid interval at `rate` U/hr.
pub fn interval_delivery(rate: f64) -> f64 {
    rate * grid_interval().num_minutes() as f64 / 60.0
}

/// Pair filled rates with their per-interval delivery.
pub fn basal_points(grid: &GridSeries, filled: &[Option<f64>]) -> Vec<BasalGridPoint> {
    grid.points()
        .iter()
        .zip(filled)
        .map(|(&datetime, rate)| BasalGridPoint {
            datetime,
            basal_rate: *rate,
            basal_delivery: rate.map(interval_delivery),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_short_gaps() {
        let values = [Some(1.0), None, None, Some(2.0), None];
        let filled = bounded_forward_fill(&values, TimeDelta::hours(24));
        assert_eq!(filled, vec![Some(1.0), Some(1.0), Some(1.0), Some(2.0), Some(2.0)]);
    }

    #[test]
    fn test_leading_nulls_stay_null() {
        let filled = bounded_forward_fill(&[None, Some(1.0)], TimeDelta::hours(24));
        assert_eq!(filled, vec![None, Some(1.0)]);
    }

    #[test]
    fn test_limit_is_exclusive() {
        // Three intervals of 5 minutes; the third point is exactly 15 minutes out.
        let values = [Some(1.0), None, None, None];
        let filled = bounded_forward_fill(&values, TimeDelta::minutes(15));
        assert_eq!(filled, vec![Some(1.0), Some(1.0), Some(1.0), None]);
    }

    #[test]
    fn test_gap_beyond_a_day_stays_null() {
        let mut values = vec![None; 300];
        values[0] = Some(0.8);
        let filled = bounded_forward_fill(&values, TimeDelta::hours(24));
        assert_eq!(filled[287], Some(0.8));
        assert_eq!(filled[288], None);
        assert_eq!(filled[299], None);
    }

    #[test]
    fn test_delivery_is_rate_over_twelve() {
        assert!((interval_delivery(1.2) - 0.1).abs() < 1e-12);
        assert_eq!(interval_delivery(0.0), 0.0);
    }
}
