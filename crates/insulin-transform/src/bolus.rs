//! Bolus delivery expansion.
//!
//! Extended boluses are split into equal 5-minute sub-deliveries, floored to
//! the grid and summed per slot. Missing bolus activity means zero delivery,
//! so the grid is zero-filled.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use insulin_model::{BolusEvent, BolusGridPoint, EmptySeriesError, NormalizeError};

use crate::grid::{GridSeries, build_grid, floor_to_grid, grid_interval};
use crate::order::SortedEvents;

/// One 5-minute share of a bolus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubDelivery {
    pub timestamp: NaiveDateTime,
    pub amount: f64,
}

/// Number of grid intervals a bolus is spread over; at least one.
pub fn delivery_steps(event: &BolusEvent) -> i32 {
    let interval_ms = grid_interval().num_milliseconds();
    let duration_ms = event.delivery_duration.num_milliseconds().max(0);
    let steps = (duration_ms + interval_ms - 1) / interval_ms;
    i32::try_from(steps.max(1)).unwrap_or(i32::MAX)
}

/// Split a bolus into `steps` equal sub-deliveries at `t, t + 5min, …`.
pub fn expand_bolus(event: &BolusEvent) -> Vec<SubDelivery> {
    let steps = delivery_steps(event);
    let per_step = event.amount / f64::from(steps);
    (0..steps)
        .map(|step| SubDelivery {
            timestamp: event.timestamp + grid_interval() * step,
            amount: per_step,
        })
        .collect()
}

/// Zero-filled bolus grid for one patient.
#[derive(Debug, Clone, PartialEq)]
pub struct BolusGrid {
    pub grid: GridSeries,
    pub points: Vec<BolusGridPoint>,
}

impl BolusGrid {
    pub fn total(&self) -> f64 {
        self.points.iter().map(|point| point.bolus).sum()
    }

    /// Delivered units per calendar date.
    pub fn daily_delivered(&self) -> BTreeMap<NaiveDate, f64> {
        let mut totals = BTreeMap::new();
        for point in &self.points {
            *totals.entry(point.datetime.date()).or_insert(0.0) += point.bolus;
        }
        totals
    }
}

/// Expand, floor and sum every bolus of a patient onto a zero-filled grid.
///
/// The grid spans the sub-deliveries, so a delivery running past midnight
/// extends it into the next day. Fails when the grid total drifts from the
/// source total by more than `mass_tolerance` (relative, floored at 1 U).
pub fn bolus_grid(
    patient_id: &str,
    events: &SortedEvents<BolusEvent>,
    mass_tolerance: f64,
) -> Result<BolusGrid, NormalizeError> {
    let deliveries: Vec<SubDelivery> = events.iter().flat_map(expand_bolus).collect();
    let timestamps: Vec<NaiveDateTime> = deliveries.iter().map(|d| d.timestamp).collect();
    let grid = build_grid(&timestamps).map_err(|EmptySeriesError| NormalizeError::EmptySeries {
        patient_id: patient_id.to_string(),
    })?;

    let mut amounts = vec![0.0; grid.len()];
    for delivery in &deliveries {
        let slot = grid.index_of(floor_to_grid(delivery.timestamp)).ok_or_else(|| {
            NormalizeError::Integrity {
                patient_id: patient_id.to_string(),
                reason: format!("bolus delivery at {} falls outside its grid", delivery.timestamp),
            }
        })?;
        amounts[slot] += delivery.amount;
    }

    let points: Vec<BolusGridPoint> = grid
        .points()
        .iter()
        .zip(amounts)
        .map(|(&datetime, bolus)| BolusGridPoint { datetime, bolus })
        .collect();
    let result = BolusGrid { grid, points };

    let source_total: f64 = events.iter().map(|event| event.amount).sum();
    let drift = (result.total() - source_total).abs();
    if drift > mass_tolerance * source_total.abs().max(1.0) {
        return Err(NormalizeError::Integrity {
            patient_id: patient_id.to_string(),
            reason: format!(
                "bolus mass not conserved: grid total {} vs source total {source_total}",
                result.total()
            ),
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, day).unwrap()
    }

    #[test]
    fn test_immediate_bolus_is_single_step() {
        let event = BolusEvent::immediate("1", at(1, 8, 3), 4.0);
        assert_eq!(
            expand_bolus(&event),
            vec![SubDelivery {
                timestamp: at(1, 8, 3),
                amount: 4.0
            }]
        );
    }

    #[test]
    fn test_partial_interval_rounds_steps_up() {
        let event = BolusEvent::extended("1", at(1, 8, 0), 3.0, TimeDelta::minutes(11));
        assert_eq!(delivery_steps(&event), 3);
        let parts = expand_bolus(&event);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].timestamp, at(1, 8, 10));
        assert!(parts.iter().all(|part| part.amount == 1.0));
    }

    #[test]
    fn test_extended_bolus_crosses_midnight() {
        let events = SortedEvents::new(vec![BolusEvent::extended(
            "1",
            at(1, 22, 0),
            10.0,
            TimeDelta::hours(4),
        )]);
        let grid = bolus_grid("1", &events, 1e-9).unwrap();
        assert_eq!(grid.grid.start(), at(1, 0, 0));
        assert_eq!(grid.grid.end(), at(3, 0, 0));
        let daily = grid.daily_delivered();
        assert!((daily[&date(1)] - 5.0).abs() < 1e-9);
        assert!((daily[&date(2)] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlapping_deliveries_add() {
        let events = SortedEvents::new(vec![
            BolusEvent::extended("1", at(1, 8, 0), 2.0, TimeDelta::minutes(10)),
            BolusEvent::immediate("1", at(1, 8, 7), 3.0),
        ]);
        let grid = bolus_grid("1", &events, 1e-9).unwrap();
        let slot = grid.grid.index_of(at(1, 8, 5)).unwrap();
        assert_eq!(grid.points[slot].bolus, 4.0);
        assert_eq!(grid.points[slot - 1].bolus, 1.0);
        assert_eq!(grid.total(), 5.0);
    }

    #[test]
    fn test_empty_bolus_stream() {
        let events = SortedEvents::new(Vec::new());
        assert!(matches!(
            bolus_grid("7", &events, 1e-9),
            Err(NormalizeError::EmptySeries { .. })
        ));
    }
}
