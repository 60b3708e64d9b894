//! Checked sort step.
//!
//! Every stage downstream takes [`SortedEvents`], so the chronological
//! precondition is carried by the type instead of being assumed.

use std::ops::Deref;

use insulin_model::TimedEvent;

/// Events in non-decreasing timestamp order.
///
/// Equal timestamps keep their reported order.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedEvents<E> {
    events: Vec<E>,
    reordered: bool,
}

impl<E: TimedEvent> SortedEvents<E> {
    /// Sort `events` chronologically, recording whether anything had to move.
    pub fn new(mut events: Vec<E>) -> Self {
        let reordered = !events
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp());
        if reordered {
            events.sort_by_key(TimedEvent::timestamp);
        }
        Self { events, reordered }
    }

    /// Sort a borrowed stream.
    pub fn from_slice(events: &[E]) -> Self
    where
        E: Clone,
    {
        Self::new(events.to_vec())
    }

    /// True when the input arrived out of order.
    pub fn was_reordered(&self) -> bool {
        self.reordered
    }
}

impl<E> Deref for SortedEvents<E> {
    type Target = [E];

    fn deref(&self) -> &[E] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use insulin_model::CgmEvent;

    fn reading(minute: u32, value: f64) -> CgmEvent {
        let timestamp = NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(8, minute, 0)
            .unwrap();
        CgmEvent::new("1", timestamp, value)
    }

    #[test]
    fn sorted_input_is_untouched() {
        let sorted = SortedEvents::new(vec![reading(0, 1.0), reading(5, 2.0)]);
        assert!(!sorted.was_reordered());
        assert_eq!(sorted.len(), 2);
    }

    #[test]
    fn unsorted_input_is_sorted_stably() {
        let sorted = SortedEvents::new(vec![
            reading(10, 1.0),
            reading(5, 2.0),
            reading(10, 3.0),
            reading(0, 4.0),
        ]);
        assert!(sorted.was_reordered());
        let values: Vec<f64> = sorted.iter().map(|event| event.value).collect();
        assert_eq!(values, vec![4.0, 2.0, 1.0, 3.0]);
    }
}
