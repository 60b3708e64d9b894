//! Per-patient normalization pipeline.
//!
//! Stages, in order:
//! 1. **Validate**: reject malformed values before any arithmetic
//! 2. **Bolus**: merge, expand and sum onto a zero-filled grid
//! 3. **Basal**: overlay modifiers, resolve duplicates (overlay samples win
//!    their slot), resample, bounded fill
//! 4. **CGM**: resolve duplicates, resample, clamp
//! 5. **Daily doses**: basal and bolus totals per calendar day
//!
//! Each stream is placed on its own grid spanning that stream's events.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{NaiveDateTime, TimeDelta};
use insulin_model::{
    BasalRateEvent, BolusAttribution, CgmEvent, IssueKind, NormalizationOptions,
    NormalizeError, PatientOutput, PatientStreams, PolicyIssue, StreamKind, TimedEvent,
    max_event_duration,
};
use tracing::{debug, info_span, warn};

use crate::bolus::bolus_grid;
use crate::cgm::cgm_points;
use crate::dedupe::{merge_boluses, resolve_duplicates, resolve_rate_duplicates};
use crate::fill::{basal_points, bounded_forward_fill};
use crate::grid::{GridSeries, build_grid};
use crate::order::SortedEvents;
use crate::overlay::{BasalModifiers, overlay_basal};
use crate::resample::{Resampled, Sample, resample_nearest};
use crate::tdd::{combine_daily, daily_basal_totals, daily_bolus_totals, reduce_reported_tdd};

/// Collects policy issues for one patient.
struct IssueLog<'a> {
    patient_id: &'a str,
    issues: Vec<PolicyIssue>,
}

impl<'a> IssueLog<'a> {
    fn new(patient_id: &'a str) -> Self {
        Self {
            patient_id,
            issues: Vec::new(),
        }
    }

    fn record(&mut self, stream: StreamKind, kind: IssueKind, count: usize, message: String) {
        if count == 0 {
            return;
        }
        warn!(
            patient_id = %self.patient_id,
            stream = %stream,
            kind = kind.as_str(),
            count,
            "{message}"
        );
        self.issues.push(PolicyIssue::warning(
            self.patient_id,
            stream,
            kind,
            count as u64,
            message,
        ));
    }

    fn sorted<E: TimedEvent>(
        &mut self,
        stream: StreamKind,
        events: SortedEvents<E>,
    ) -> SortedEvents<E> {
        if events.was_reordered() {
            self.record(
                stream,
                IssueKind::UnsortedInput,
                1,
                format!("{stream} events arrived out of order and were sorted"),
            );
        }
        events
    }
}

fn check_non_negative(
    patient_id: &str,
    column: &str,
    values: impl IntoIterator<Item = f64>,
) -> Result<(), NormalizeError> {
    match values
        .into_iter()
        .find(|value| !value.is_finite() || *value < 0.0)
    {
        Some(value) => Err(NormalizeError::malformed(patient_id, column, value.to_string())),
        None => Ok(()),
    }
}

/// Reject a duration that is negative, longer than
/// [`max_event_duration`], or whose end is not representable.
fn check_duration(
    patient_id: &str,
    column: &str,
    timestamp: NaiveDateTime,
    duration: TimeDelta,
) -> Result<(), NormalizeError> {
    let in_range = duration >= TimeDelta::zero() && duration <= max_event_duration();
    if in_range && timestamp.checked_add_signed(duration).is_some() {
        Ok(())
    } else {
        Err(NormalizeError::malformed(patient_id, column, duration.to_string()))
    }
}

/// Reject values no stage can interpret.
pub fn validate_streams(streams: &PatientStreams) -> Result<(), NormalizeError> {
    let patient_id = streams.patient_id.as_str();
    check_non_negative(patient_id, "bolus", streams.bolus.iter().map(|e| e.amount))?;
    for event in &streams.bolus {
        check_duration(
            patient_id,
            "delivery_duration",
            event.timestamp,
            event.delivery_duration,
        )?;
    }
    check_non_negative(patient_id, "basal_rate", streams.basal.iter().map(|e| e.rate))?;
    if let Some(event) = streams.cgm.iter().find(|event| !event.value.is_finite()) {
        return Err(NormalizeError::malformed(patient_id, "cgm", event.value.to_string()));
    }
    check_non_negative(
        patient_id,
        "temp_basal_amount",
        streams.temp_basal.iter().map(|e| e.amount),
    )?;
    for event in &streams.temp_basal {
        check_duration(patient_id, "temp_basal_duration", event.timestamp, event.duration)?;
    }
    Ok(())
}

fn checked_grid(
    patient_id: &str,
    timestamps: &[NaiveDateTime],
) -> Result<GridSeries, NormalizeError> {
    let grid = build_grid(timestamps).map_err(|_| NormalizeError::EmptySeries {
        patient_id: patient_id.to_string(),
    })?;
    if !grid.is_contiguous() {
        return Err(NormalizeError::Integrity {
            patient_id: patient_id.to_string(),
            reason: format!("grid {}..{} is not contiguous", grid.start(), grid.end()),
        });
    }
    Ok(grid)
}

fn resample_stream(
    grid: &GridSeries,
    samples: &[Sample],
    options: &NormalizationOptions,
    log: &mut IssueLog<'_>,
    stream: StreamKind,
) -> Resampled {
    let resampled = resample_nearest(grid, samples, options.tolerance(), options.tie_break);
    log.record(
        stream,
        IssueKind::TieBreak,
        resampled.ties,
        format!(
            "{} grid points had two equidistant {stream} samples",
            resampled.ties
        ),
    );
    resampled
}

/// Normalize every stream of one patient.
pub fn normalize_patient(
    streams: &PatientStreams,
    options: &NormalizationOptions,
) -> Result<PatientOutput, NormalizeError> {
    let patient_id = streams.patient_id.as_str();
    let span = info_span!("patient", patient_id = %patient_id);
    let _guard = span.enter();
    let start = Instant::now();

    if streams.is_empty() {
        return Err(NormalizeError::EmptySeries {
            patient_id: patient_id.to_string(),
        });
    }
    validate_streams(streams)?;

    let mut log = IssueLog::new(patient_id);
    let mut output = PatientOutput::new(patient_id);

    // Bolus
    let boluses = log.sorted(StreamKind::Bolus, SortedEvents::from_slice(&streams.bolus));
    let expanded = info_span!("bolus").in_scope(|| -> Result<_, NormalizeError> {
        if boluses.is_empty() {
            return Ok(None);
        }
        let merged = merge_boluses(&boluses);
        log.record(
            StreamKind::Bolus,
            IssueKind::DuplicateResolved,
            merged.merged_groups,
            format!("{} bolus slots merged by summing", merged.merged_groups),
        );
        let grid = bolus_grid(patient_id, &merged.events, options.mass_tolerance)?;
        debug!(
            events = boluses.len(),
            merged = merged.events.len(),
            grid_points = grid.points.len(),
            "bolus grid complete"
        );
        Ok(Some(grid))
    })?;

    // Basal
    let scheduled = log.sorted(StreamKind::Basal, SortedEvents::from_slice(&streams.basal));
    let effective = info_span!("basal").in_scope(|| -> Result<Vec<BasalRateEvent>, NormalizeError> {
        let modifiers = BasalModifiers::from_streams(streams);
        if scheduled.is_empty() && !modifiers.has_absolute_temps() {
            log.record(
                StreamKind::Basal,
                IssueKind::ModifiersWithoutBasal,
                modifiers.len(),
                format!(
                    "{} temp basal, suspend or closed-loop events ignored without basal rates",
                    modifiers.len()
                ),
            );
            return Ok(Vec::new());
        }
        let (effective, overridden) = if modifiers.is_empty() {
            (scheduled.to_vec(), BTreeSet::new())
        } else {
            let outcome = overlay_basal(patient_id, &scheduled, &modifiers);
            log.record(
                StreamKind::TempBasal,
                IssueKind::TempWithoutSchedule,
                outcome.unrestored_temps,
                format!(
                    "{} absolute temp basals ended without a scheduled rate to resume",
                    outcome.unrestored_temps
                ),
            );
            log.record(
                StreamKind::Suspend,
                IssueKind::SuspendWithoutPriorRate,
                outcome.missing_restores,
                format!(
                    "{} suspend windows ended without a rate to restore",
                    outcome.missing_restores
                ),
            );
            log.record(
                StreamKind::Suspend,
                IssueKind::OpenSuspend,
                outcome.open_suspends,
                "suspend never returned to normal delivery".to_string(),
            );
            (outcome.events, outcome.overridden)
        };
        if effective.is_empty() {
            return Ok(effective);
        }

        let deduped = resolve_rate_duplicates(
            &SortedEvents::new(effective.clone()),
            options.basal_duplicates,
            |event| event.rate,
            |event| overridden.contains(&event.timestamp),
        );
        log.record(
            StreamKind::Basal,
            IssueKind::DuplicateResolved,
            deduped.merged_groups,
            format!(
                "{} basal slots resolved by policy '{}'",
                deduped.merged_groups,
                options.basal_duplicates.as_str()
            ),
        );
        let timestamps: Vec<_> = deduped.events.iter().map(|event| event.timestamp).collect();
        let grid = checked_grid(patient_id, &timestamps)?;
        let samples: Vec<Sample> = deduped.events.iter().map(Sample::from).collect();
        let resampled = resample_stream(&grid, &samples, options, &mut log, StreamKind::Basal);
        let filled = bounded_forward_fill(&resampled.values, options.forward_fill_limit());
        let points = basal_points(&grid, &filled);
        debug!(
            scheduled = scheduled.len(),
            effective = effective.len(),
            grid_points = points.len(),
            "basal grid complete"
        );
        output.basal = Some(points);
        Ok(effective)
    })?;

    // CGM
    let readings = log.sorted(StreamKind::Cgm, SortedEvents::from_slice(&streams.cgm));
    output.cgm = info_span!("cgm").in_scope(|| -> Result<_, NormalizeError> {
        if readings.is_empty() {
            return Ok(None);
        }
        let deduped = resolve_duplicates(&readings, options.cgm_duplicates, |event: &CgmEvent| {
            event.value
        });
        log.record(
            StreamKind::Cgm,
            IssueKind::DuplicateResolved,
            deduped.merged_groups,
            format!(
                "{} CGM slots resolved by policy '{}'",
                deduped.merged_groups,
                options.cgm_duplicates.as_str()
            ),
        );
        let timestamps: Vec<_> = deduped.events.iter().map(|event| event.timestamp).collect();
        let grid = checked_grid(patient_id, &timestamps)?;
        let samples: Vec<Sample> = deduped.events.iter().map(Sample::from).collect();
        let resampled = resample_stream(&grid, &samples, options, &mut log, StreamKind::Cgm);
        let points = cgm_points(&grid, &resampled.values, options.cgm_floor, options.cgm_ceiling);
        debug!(
            readings = readings.len(),
            grid_points = points.len(),
            "cgm grid complete"
        );
        Ok(Some(points))
    })?;

    // Daily doses
    info_span!("daily_doses").in_scope(|| {
        let basal_totals = daily_basal_totals(&effective);
        let bolus_totals = match (options.bolus_attribution, &expanded) {
            (BolusAttribution::Delivery, Some(grid)) => grid.daily_delivered(),
            _ => daily_bolus_totals(&boluses),
        };
        output.daily_doses = combine_daily(patient_id, &basal_totals, &bolus_totals);

        let reported = SortedEvents::from_slice(&streams.reported_tdd);
        output.reported_tdd =
            reduce_reported_tdd(patient_id, &reported, options.reported_tdd_method);
        debug!(
            days = output.daily_doses.len(),
            reported = output.reported_tdd.len(),
            "daily doses complete"
        );
    });

    output.bolus = expanded.map(|grid| grid.points);
    output.effective_basal = effective;
    output.issues = log.issues;
    debug!(
        grid_points = output.grid_points(),
        issues = output.issues.len(),
        duration_ms = start.elapsed().as_millis(),
        "patient normalized"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use insulin_model::{
        BolusEvent, DuplicatePolicy, SuspendState, SuspendStateEvent, TempBasalEvent,
        TempBasalKind,
    };

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_patient_is_rejected() {
        let streams = PatientStreams::new("1");
        assert_eq!(
            normalize_patient(&streams, &NormalizationOptions::default()),
            Err(NormalizeError::EmptySeries {
                patient_id: "1".to_string()
            })
        );
    }

    #[test]
    fn test_negative_amount_is_malformed() {
        let mut streams = PatientStreams::new("1");
        streams.bolus.push(BolusEvent::immediate("1", at(1, 8, 0), -1.0));
        let result = normalize_patient(&streams, &NormalizationOptions::default());
        assert!(matches!(result, Err(NormalizeError::MalformedValue { .. })));
    }

    #[test]
    fn test_streams_get_their_own_grids() {
        let mut streams = PatientStreams::new("1");
        streams.basal.push(BasalRateEvent::new("1", at(1, 0, 0), 1.0));
        streams.cgm.push(CgmEvent::new("1", at(2, 10, 1), 110.0));
        let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();

        assert!(output.bolus.is_none());
        let basal = output.basal.as_ref().unwrap();
        assert_eq!(basal.len(), 288);
        assert!(basal.iter().all(|point| point.basal_rate == Some(1.0)));
        let cgm = output.cgm.as_ref().unwrap();
        assert_eq!(cgm.len(), 288);
        assert_eq!(cgm[0].datetime, at(2, 0, 0));
        assert_eq!(cgm.iter().flat_map(|point| point.cgm).count(), 1);

        assert_eq!(output.daily_doses.len(), 1);
        assert!((output.daily_doses[0].basal_total - 24.0).abs() < 1e-9);
        assert!(output.daily_doses[0].bolus_total.is_nan());
    }

    #[test]
    fn test_suspend_flows_into_grid_and_issues() {
        let mut streams = PatientStreams::new("1");
        streams.basal.push(BasalRateEvent::new("1", at(1, 0, 0), 1.2));
        streams.suspend.push(SuspendStateEvent {
            patient_id: "1".to_string(),
            timestamp: at(1, 10, 0),
            state: SuspendState::Suspended,
        });
        let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();

        let basal = output.basal.as_ref().unwrap();
        assert_eq!(basal[120].basal_rate, Some(0.0));
        assert_eq!(basal[287].basal_delivery, Some(0.0));
        assert_eq!(basal[119].basal_rate, Some(1.2));
        assert!(
            output
                .issues
                .iter()
                .any(|issue| issue.kind == IssueKind::OpenSuspend)
        );
    }

    #[test]
    fn test_off_grid_suspend_survives_slot_resolution() {
        let mut streams = PatientStreams::new("1");
        streams.basal = vec![
            BasalRateEvent::new("1", at(1, 0, 0), 1.0),
            BasalRateEvent::new("1", at(1, 10, 0), 1.0),
        ];
        for (minute, state) in [(1, SuspendState::Suspended), (30, SuspendState::Normal)] {
            streams.suspend.push(SuspendStateEvent {
                patient_id: "1".to_string(),
                timestamp: at(1, 10, minute),
                state,
            });
        }

        for policy in [DuplicatePolicy::Max, DuplicatePolicy::First] {
            let options = NormalizationOptions::default().with_basal_duplicates(policy);
            let output = normalize_patient(&streams, &options).unwrap();
            let basal = output.basal.as_ref().unwrap();
            assert_eq!(basal[119].basal_rate, Some(1.0));
            for point in &basal[120..126] {
                assert_eq!(point.basal_rate, Some(0.0), "{} under {policy:?}", point.datetime);
            }
            assert_eq!(basal[126].basal_rate, Some(1.0));
            assert!((output.daily_doses[0].basal_total - (24.0 - 29.0 / 60.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_absolute_temp_without_schedule_reaches_grid() {
        let mut streams = PatientStreams::new("1");
        streams.cgm.push(CgmEvent::new("1", at(1, 8, 0), 120.0));
        streams.temp_basal.push(TempBasalEvent {
            patient_id: "1".to_string(),
            timestamp: at(1, 6, 0),
            kind: TempBasalKind::AbsoluteRate,
            amount: 2.0,
            duration: TimeDelta::hours(2),
        });
        let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();

        assert_eq!(output.effective_basal.len(), 1);
        assert_eq!(output.effective_basal[0].rate, 2.0);
        let basal = output.basal.as_ref().unwrap();
        assert_eq!(basal[71].basal_rate, None);
        assert_eq!(basal[72].basal_rate, Some(2.0));
        assert!(!output.daily_doses[0].basal_total.is_nan());
        assert!(
            output
                .issues
                .iter()
                .any(|issue| issue.kind == IssueKind::TempWithoutSchedule)
        );
    }

    #[test]
    fn test_modifiers_without_basal_are_reported() {
        let mut streams = PatientStreams::new("1");
        streams.cgm.push(CgmEvent::new("1", at(1, 8, 0), 120.0));
        streams.suspend.push(SuspendStateEvent {
            patient_id: "1".to_string(),
            timestamp: at(1, 9, 0),
            state: SuspendState::Suspended,
        });
        let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();

        assert!(output.basal.is_none());
        assert!(output.effective_basal.is_empty());
        let issue = output
            .issues
            .iter()
            .find(|issue| issue.kind == IssueKind::ModifiersWithoutBasal)
            .unwrap();
        assert_eq!(issue.count, 1);
    }

    #[test]
    fn test_durations_beyond_bound_are_malformed() {
        let mut temp_only = PatientStreams::new("1");
        temp_only.basal.push(BasalRateEvent::new("1", at(1, 0, 0), 1.0));
        temp_only.temp_basal.push(TempBasalEvent {
            patient_id: "1".to_string(),
            timestamp: at(1, 6, 0),
            kind: TempBasalKind::Percent,
            amount: 50.0,
            duration: TimeDelta::MAX,
        });
        assert!(matches!(
            validate_streams(&temp_only),
            Err(NormalizeError::MalformedValue { ref column, .. }) if column == "temp_basal_duration"
        ));

        let mut bolus_only = PatientStreams::new("1");
        bolus_only.bolus.push(BolusEvent::extended(
            "1",
            at(1, 6, 0),
            3.0,
            max_event_duration() + TimeDelta::minutes(5),
        ));
        assert!(matches!(
            validate_streams(&bolus_only),
            Err(NormalizeError::MalformedValue { ref column, .. }) if column == "delivery_duration"
        ));

        bolus_only.bolus[0].delivery_duration = max_event_duration();
        assert!(validate_streams(&bolus_only).is_ok());
    }

    #[test]
    fn test_unsorted_and_duplicate_input_is_reported() {
        let mut streams = PatientStreams::new("1");
        streams.cgm = vec![
            CgmEvent::new("1", at(1, 8, 5), 120.0),
            CgmEvent::new("1", at(1, 8, 0), 100.0),
            CgmEvent::new("1", at(1, 8, 1), 105.0),
        ];
        let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();
        let kinds: Vec<IssueKind> = output.issues.iter().map(|issue| issue.kind).collect();
        assert!(kinds.contains(&IssueKind::UnsortedInput));
        assert!(kinds.contains(&IssueKind::DuplicateResolved));
        let cgm = output.cgm.unwrap();
        assert_eq!(cgm[96].cgm, Some(100.0));
        assert_eq!(cgm[97].cgm, Some(120.0));
    }

    #[test]
    fn test_delivery_attribution_uses_expanded_grid() {
        let mut streams = PatientStreams::new("1");
        streams.bolus.push(BolusEvent::extended(
            "1",
            at(1, 22, 0),
            10.0,
            TimeDelta::hours(4),
        ));
        let by_event = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();
        assert_eq!(by_event.daily_doses.len(), 1);
        assert_eq!(by_event.daily_doses[0].bolus_total, 10.0);

        let options =
            NormalizationOptions::default().with_bolus_attribution(BolusAttribution::Delivery);
        let by_delivery = normalize_patient(&streams, &options).unwrap();
        assert_eq!(by_delivery.daily_doses.len(), 2);
        assert!((by_delivery.daily_doses[1].bolus_total - 5.0).abs() < 1e-9);
        assert!((by_delivery.bolus_total() - 10.0).abs() < 1e-9);
    }
}
