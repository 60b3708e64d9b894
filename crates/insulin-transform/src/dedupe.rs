//! Duplicate resolution.
//!
//! Events are grouped by the grid slot they round to. Each group collapses to
//! one representative event which keeps its own reported timestamp; only the
//! grouping uses the rounded slot.

use insulin_model::{BolusEvent, DuplicatePolicy, TimedEvent};

use crate::grid::round_to_grid;
use crate::order::SortedEvents;

/// Result of a resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Deduplicated<E> {
    pub events: SortedEvents<E>,
    /// Number of slots that held more than one event.
    pub merged_groups: usize,
}

/// Split sorted events into runs sharing a rounded grid slot.
///
/// Rounding is monotone, so slot groups are contiguous in sorted input.
fn slot_groups<E: TimedEvent>(events: &[E]) -> Vec<&[E]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for idx in 1..=events.len() {
        let boundary = idx == events.len()
            || round_to_grid(events[idx].timestamp()) != round_to_grid(events[start].timestamp());
        if boundary {
            groups.push(&events[start..idx]);
            start = idx;
        }
    }
    groups
}

/// Merge boluses sharing a slot.
///
/// Amounts are summed, the longest delivery duration wins and the group keeps
/// the earliest timestamp.
pub fn merge_boluses(events: &SortedEvents<BolusEvent>) -> Deduplicated<BolusEvent> {
    let mut merged_groups = 0;
    let mut merged = Vec::new();
    for group in slot_groups(events) {
        let Some(first) = group.first() else {
            continue;
        };
        if group.len() > 1 {
            merged_groups += 1;
        }
        let mut representative = first.clone();
        representative.amount = group.iter().map(|event| event.amount).sum();
        representative.delivery_duration = group
            .iter()
            .map(|event| event.delivery_duration)
            .max()
            .unwrap_or(first.delivery_duration);
        merged.push(representative);
    }
    Deduplicated {
        events: SortedEvents::new(merged),
        merged_groups,
    }
}

/// Keep one event per slot according to `policy`.
///
/// `value` extracts the quantity compared by [`DuplicatePolicy::Max`].
pub fn resolve_duplicates<E, F>(
    events: &SortedEvents<E>,
    policy: DuplicatePolicy,
    value: F,
) -> Deduplicated<E>
where
    E: TimedEvent + Clone,
    F: Fn(&E) -> f64,
{
    resolve_rate_duplicates(events, policy, value, |_| false)
}

/// Like [`resolve_duplicates`], for step-function streams with overrides.
///
/// A slot holding an `overridden` event keeps the slot's latest event, the
/// value in force when the slot ends. Other slots follow `policy`.
pub fn resolve_rate_duplicates<E, F, O>(
    events: &SortedEvents<E>,
    policy: DuplicatePolicy,
    value: F,
    overridden: O,
) -> Deduplicated<E>
where
    E: TimedEvent + Clone,
    F: Fn(&E) -> f64,
    O: Fn(&E) -> bool,
{
    let mut merged_groups = 0;
    let mut kept = Vec::new();
    for group in slot_groups(events) {
        let policy = if group.len() > 1 {
            merged_groups += 1;
            if group.iter().any(&overridden) {
                DuplicatePolicy::Last
            } else {
                policy
            }
        } else {
            policy
        };
        let chosen = match policy {
            DuplicatePolicy::First => group.first(),
            DuplicatePolicy::Last => group.last(),
            DuplicatePolicy::Max => group.iter().reduce(|best, candidate| {
                if value(candidate) > value(best) {
                    candidate
                } else {
                    best
                }
            }),
        };
        if let Some(event) = chosen {
            kept.push(event.clone());
        }
    }
    Deduplicated {
        events: SortedEvents::new(kept),
        merged_groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use insulin_model::BasalRateEvent;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn basal(ts: NaiveDateTime, rate: f64) -> BasalRateEvent {
        BasalRateEvent::new("1", ts, rate)
    }

    #[test]
    fn test_bolus_group_is_summed() {
        let events = SortedEvents::new(vec![
            BolusEvent::immediate("1", at(8, 0, 30), 2.0),
            BolusEvent::extended("1", at(8, 1, 0), 3.0, TimeDelta::minutes(30)),
            BolusEvent::immediate("1", at(9, 0, 0), 1.0),
        ]);
        let merged = merge_boluses(&events);
        assert_eq!(merged.merged_groups, 1);
        assert_eq!(merged.events.len(), 2);
        assert_eq!(merged.events[0].timestamp, at(8, 0, 30));
        assert_eq!(merged.events[0].amount, 5.0);
        assert_eq!(merged.events[0].delivery_duration, TimeDelta::minutes(30));
    }

    #[test]
    fn test_policies_pick_expected_event() {
        let events = SortedEvents::new(vec![
            basal(at(10, 1, 0), 0.8),
            basal(at(10, 2, 0), 1.2),
            basal(at(9, 59, 0), 0.5),
        ]);
        let rate = |event: &BasalRateEvent| event.rate;

        let first = resolve_duplicates(&events, DuplicatePolicy::First, rate);
        assert_eq!(first.events[0].rate, 0.5);
        assert_eq!(first.merged_groups, 1);

        let last = resolve_duplicates(&events, DuplicatePolicy::Last, rate);
        assert_eq!(last.events[0].rate, 1.2);

        let max = resolve_duplicates(&events, DuplicatePolicy::Max, rate);
        assert_eq!(max.events.len(), 1);
        assert_eq!(max.events[0].rate, 1.2);
        assert_eq!(max.events[0].timestamp, at(10, 2, 0));
    }

    #[test]
    fn test_max_keeps_earliest_on_equal_values() {
        let events = SortedEvents::new(vec![basal(at(10, 0, 0), 1.0), basal(at(10, 1, 0), 1.0)]);
        let max = resolve_duplicates(&events, DuplicatePolicy::Max, |event| event.rate);
        assert_eq!(max.events[0].timestamp, at(10, 0, 0));
    }

    #[test]
    fn test_overridden_slot_keeps_latest_event() {
        let events = SortedEvents::new(vec![
            basal(at(10, 0, 0), 1.0),
            basal(at(10, 1, 0), 0.0),
            basal(at(10, 30, 0), 1.0),
            basal(at(10, 31, 0), 0.5),
        ]);
        let overlaid = [at(10, 1, 0)];
        let kept = resolve_rate_duplicates(
            &events,
            DuplicatePolicy::Max,
            |event| event.rate,
            |event| overlaid.contains(&event.timestamp),
        );
        assert_eq!(kept.merged_groups, 2);
        let rates: Vec<f64> = kept.events.iter().map(|event| event.rate).collect();
        assert_eq!(rates, vec![0.0, 1.0]);
    }

    #[test]
    fn test_distinct_slots_untouched() {
        let events = SortedEvents::new(vec![basal(at(10, 0, 0), 1.0), basal(at(10, 5, 0), 2.0)]);
        let kept = resolve_duplicates(&events, DuplicatePolicy::First, |event| event.rate);
        assert_eq!(kept.merged_groups, 0);
        assert_eq!(kept.events.len(), 2);
    }
}
