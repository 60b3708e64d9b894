//! Basal overlay engine.
//!
//! Composes a patient's scheduled basal rates with temporary basal
//! overrides, closed-loop periods and pump suspends into one effective rate
//! stream. The passes run in that order, each on the previous pass's output.
//!
//! Samples are never removed during the passes; an overridden sample is
//! nulled and dropped at the end. At most one non-null sample exists per
//! timestamp.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use insulin_model::{
    AutoModeEvent, BasalRateEvent, PatientStreams, SuspendState, SuspendStateEvent,
    TempBasalEvent, TempBasalKind,
};
use tracing::debug;

use crate::order::SortedEvents;

/// Temp basal, closed-loop and suspend streams of one patient, sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalModifiers {
    pub temp_basal: SortedEvents<TempBasalEvent>,
    pub auto_mode: SortedEvents<AutoModeEvent>,
    pub suspend: SortedEvents<SuspendStateEvent>,
}

impl BasalModifiers {
    pub fn from_streams(streams: &PatientStreams) -> Self {
        Self {
            temp_basal: SortedEvents::from_slice(&streams.temp_basal),
            auto_mode: SortedEvents::from_slice(&streams.auto_mode),
            suspend: SortedEvents::from_slice(&streams.suspend),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.temp_basal.len() + self.auto_mode.len() + self.suspend.len()
    }

    /// Absolute temp basals carry their own rate and need no schedule.
    pub fn has_absolute_temps(&self) -> bool {
        self.temp_basal
            .iter()
            .any(|temp| temp.kind == TempBasalKind::AbsoluteRate)
    }
}

/// One maximal suspended interval; `end` is `None` when delivery never resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendWindow {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

/// Run the {Normal, Suspended} state machine over sorted transitions.
///
/// Delivery is assumed normal before the first transition. Repeated states
/// are not transitions.
pub fn suspend_windows(events: &[SuspendStateEvent]) -> Vec<SuspendWindow> {
    let mut windows = Vec::new();
    let mut open: Option<NaiveDateTime> = None;
    for event in events {
        match (event.state, open) {
            (SuspendState::Suspended, None) => open = Some(event.timestamp),
            (SuspendState::Normal, Some(start)) => {
                windows.push(SuspendWindow {
                    start,
                    end: Some(event.timestamp),
                });
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        windows.push(SuspendWindow { start, end: None });
    }
    windows
}

/// Effective basal stream and the anomalies met while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayOutcome {
    pub events: Vec<BasalRateEvent>,
    /// Timestamps of effective samples whose rate an overlay set.
    pub overridden: BTreeSet<NaiveDateTime>,
    /// Absolute temp basals that ended with no scheduled rate to resume.
    pub unrestored_temps: usize,
    /// Suspend windows that ended without a known rate to restore.
    pub missing_restores: usize,
    /// Suspend windows that never returned to normal delivery.
    pub open_suspends: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateSample {
    timestamp: NaiveDateTime,
    rate: Option<f64>,
    /// Reported schedule value; `None` for samples the overlays inserted.
    scheduled: Option<f64>,
    overridden: bool,
}

struct RateTrack {
    samples: Vec<RateSample>,
}

impl RateTrack {
    fn new(scheduled: &[BasalRateEvent]) -> Self {
        let samples = scheduled
            .iter()
            .map(|event| RateSample {
                timestamp: event.timestamp,
                rate: Some(event.rate),
                scheduled: Some(event.rate),
                overridden: false,
            })
            .collect();
        Self { samples }
    }

    /// Make `rate` the only value at `timestamp`.
    fn place(&mut self, timestamp: NaiveDateTime, rate: f64) {
        for sample in self.samples.iter_mut().filter(|s| s.timestamp == timestamp) {
            sample.rate = None;
        }
        let at = self.samples.partition_point(|s| s.timestamp <= timestamp);
        self.samples.insert(
            at,
            RateSample {
                timestamp,
                rate: Some(rate),
                scheduled: None,
                overridden: true,
            },
        );
    }

    fn has_rate_at(&self, timestamp: NaiveDateTime) -> bool {
        self.samples
            .iter()
            .any(|s| s.timestamp == timestamp && s.rate.is_some())
    }

    /// Last effective rate strictly before `timestamp`.
    fn rate_before(&self, timestamp: NaiveDateTime) -> Option<f64> {
        self.samples
            .iter()
            .rev()
            .filter(|s| s.timestamp < timestamp)
            .find_map(|s| s.rate)
    }

    /// Scheduled rate in force just before `timestamp`, ignoring overrides.
    fn scheduled_before(&self, timestamp: NaiveDateTime) -> Option<f64> {
        self.samples
            .iter()
            .rev()
            .filter(|s| s.timestamp < timestamp)
            .find_map(|s| s.scheduled)
    }

    fn for_range(
        &mut self,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
    ) -> impl Iterator<Item = &mut RateSample> {
        self.samples
            .iter_mut()
            .filter(move |s| s.timestamp >= start && end.is_none_or(|end| s.timestamp < end))
    }

    fn set_rate(sample: &mut RateSample, rate: f64) {
        sample.rate = Some(rate);
        sample.overridden = true;
    }

    fn into_events(self, patient_id: &str) -> (Vec<BasalRateEvent>, BTreeSet<NaiveDateTime>) {
        let mut events = Vec::with_capacity(self.samples.len());
        let mut overridden = BTreeSet::new();
        for sample in self.samples {
            let Some(rate) = sample.rate else {
                continue;
            };
            if sample.overridden {
                overridden.insert(sample.timestamp);
            }
            events.push(BasalRateEvent::new(patient_id, sample.timestamp, rate));
        }
        (events, overridden)
    }
}

/// Returns the number of absolute temps with no schedule to resume.
fn apply_temp_basals(track: &mut RateTrack, temps: &[TempBasalEvent]) -> usize {
    let mut unrestored = 0;
    for temp in temps {
        let Some(end) = temp.end() else {
            continue;
        };
        match temp.kind {
            TempBasalKind::Percent => {
                let factor = temp.amount / 100.0;
                for sample in track.for_range(temp.timestamp, Some(end)) {
                    if let (Some(_), Some(scheduled)) = (sample.rate, sample.scheduled) {
                        RateTrack::set_rate(sample, scheduled * factor);
                    }
                }
            }
            TempBasalKind::AbsoluteRate => {
                // Schedule resumes at `end` unless a rate is already reported there.
                let reported_at_end = track.has_rate_at(end);
                let restore = if reported_at_end {
                    None
                } else {
                    track.scheduled_before(end)
                };
                if !reported_at_end && restore.is_none() {
                    unrestored += 1;
                }
                for sample in track.for_range(temp.timestamp, Some(end)) {
                    sample.rate = None;
                }
                track.place(temp.timestamp, temp.amount);
                if let Some(rate) = restore.filter(|_| end > temp.timestamp) {
                    track.place(end, rate);
                }
            }
        }
    }
    unrestored
}

fn apply_auto_mode(track: &mut RateTrack, transitions: &[AutoModeEvent]) {
    if transitions.is_empty() {
        return;
    }
    let before_zeroing = track.samples.clone();
    let active_at = |timestamp: NaiveDateTime| {
        let idx = transitions.partition_point(|event| event.timestamp <= timestamp);
        idx.checked_sub(1)
            .is_some_and(|last| transitions[last].active)
    };
    for sample in &mut track.samples {
        if sample.rate.is_some() && active_at(sample.timestamp) {
            RateTrack::set_rate(sample, 0.0);
        }
    }

    let mut active = false;
    for event in transitions {
        match (active, event.active) {
            (false, true) => track.place(event.timestamp, 0.0),
            (true, false) if !track.has_rate_at(event.timestamp) => {
                let restore = before_zeroing
                    .iter()
                    .rev()
                    .filter(|s| s.timestamp <= event.timestamp)
                    .find_map(|s| s.rate);
                if let Some(rate) = restore {
                    track.place(event.timestamp, rate);
                }
            }
            _ => {}
        }
        active = event.active;
    }
}

fn apply_suspends(track: &mut RateTrack, windows: &[SuspendWindow]) -> (usize, usize) {
    let mut missing_restores = 0;
    let mut open_suspends = 0;
    for window in windows {
        let prior = track.rate_before(window.start);
        for sample in track.for_range(window.start, window.end) {
            if sample.rate.is_some() {
                RateTrack::set_rate(sample, 0.0);
            }
        }
        track.place(window.start, 0.0);

        match window.end {
            None => open_suspends += 1,
            Some(end) if track.has_rate_at(end) => {}
            Some(end) => match prior {
                Some(rate) => track.place(end, rate),
                None => missing_restores += 1,
            },
        }
    }
    (missing_restores, open_suspends)
}

/// Compose scheduled rates with every modifier stream of the patient.
pub fn overlay_basal(
    patient_id: &str,
    scheduled: &SortedEvents<BasalRateEvent>,
    modifiers: &BasalModifiers,
) -> OverlayOutcome {
    let mut track = RateTrack::new(scheduled);
    let unrestored_temps = apply_temp_basals(&mut track, &modifiers.temp_basal);
    apply_auto_mode(&mut track, &modifiers.auto_mode);
    let windows = suspend_windows(&modifiers.suspend);
    let (missing_restores, open_suspends) = apply_suspends(&mut track, &windows);

    let (events, overridden) = track.into_events(patient_id);
    debug!(
        patient_id,
        scheduled = scheduled.len(),
        effective = events.len(),
        suspend_windows = windows.len(),
        "basal overlay applied"
    );
    OverlayOutcome {
        events,
        overridden,
        unrestored_temps,
        missing_restores,
        open_suspends,
    }
}
