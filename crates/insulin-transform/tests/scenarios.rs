//! End-to-end scenarios over the per-patient pipeline.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use insulin_model::{
    BasalRateEvent, BolusAttribution, BolusEvent, CgmEvent, NormalizationOptions, PatientStreams,
    StudyStreams, SuspendState, SuspendStateEvent, TempBasalEvent, TempBasalKind,
};
use insulin_transform::{normalize_batch, normalize_patient};

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, day).unwrap()
}

fn delivery_options() -> NormalizationOptions {
    NormalizationOptions::default().with_bolus_attribution(BolusAttribution::Delivery)
}

#[test]
fn constant_basal_for_a_day_totals_24_units() {
    let mut streams = PatientStreams::new("1");
    streams.basal = vec![
        BasalRateEvent::new("1", at(1, 0, 0), 1.0),
        BasalRateEvent::new("1", at(1, 12, 0), 1.0),
    ];
    let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();

    assert_eq!(output.daily_doses.len(), 1);
    assert_eq!(output.daily_doses[0].date, date(1));
    assert!((output.daily_doses[0].basal_total - 24.0).abs() < 1e-9);
    assert!((output.basal_delivery_total() - 24.0).abs() < 1e-9);
}

#[test]
fn extended_bolus_across_midnight_splits_evenly() {
    let mut streams = PatientStreams::new("1");
    streams.bolus = vec![BolusEvent::extended(
        "1",
        at(1, 22, 0),
        10.0,
        TimeDelta::hours(4),
    )];
    let output = normalize_patient(&streams, &delivery_options()).unwrap();

    let totals: Vec<(NaiveDate, f64)> = output
        .daily_doses
        .iter()
        .map(|dose| (dose.date, dose.bolus_total))
        .collect();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[0].0, date(1));
    assert!((totals[0].1 - 5.0).abs() < 1e-9);
    assert_eq!(totals[1].0, date(2));
    assert!((totals[1].1 - 5.0).abs() < 1e-9);
}

#[test]
fn overlapping_extended_boluses_add_up() {
    let mut streams = PatientStreams::new("1");
    streams.bolus = vec![
        BolusEvent::extended("1", at(1, 22, 0), 10.0, TimeDelta::hours(4)),
        BolusEvent::extended("1", at(2, 0, 0), 10.0, TimeDelta::hours(4)),
    ];
    let output = normalize_patient(&streams, &delivery_options()).unwrap();

    assert_eq!(output.daily_doses.len(), 2);
    assert!((output.daily_doses[0].bolus_total - 5.0).abs() < 1e-9);
    assert!((output.daily_doses[1].bolus_total - 15.0).abs() < 1e-9);
    assert!((output.bolus_total() - 20.0).abs() < 1e-9);

    let points = output.bolus.unwrap();
    let overlap = points
        .iter()
        .find(|point| point.datetime == at(2, 1, 0))
        .unwrap();
    assert!((overlap.bolus - 2.0 * 10.0 / 48.0).abs() < 1e-12);
}

#[test]
fn cgm_zero_and_sentinels_are_clamped() {
    let mut streams = PatientStreams::new("1");
    streams.cgm = vec![
        CgmEvent::new("1", at(1, 8, 0), 0.0),
        CgmEvent::new("1", at(1, 8, 5), CgmEvent::parse_value("LOW").unwrap()),
        CgmEvent::new("1", at(1, 8, 10), CgmEvent::parse_value("HIGH").unwrap()),
        CgmEvent::new("1", at(1, 8, 15), 650.0),
    ];
    let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();
    let values: Vec<f64> = output.cgm.unwrap().iter().filter_map(|p| p.cgm).collect();
    assert_eq!(values, vec![40.0, 40.0, 400.0, 400.0]);
}

#[test]
fn suspend_zeroes_window_and_restores_prior_rate() {
    let mut streams = PatientStreams::new("1");
    streams.basal = vec![
        BasalRateEvent::new("1", at(1, 0, 0), 0.9),
        BasalRateEvent::new("1", at(1, 10, 30), 0.9),
    ];
    streams.suspend = vec![
        SuspendStateEvent {
            patient_id: "1".to_string(),
            timestamp: at(1, 10, 0),
            state: SuspendState::Suspended,
        },
        SuspendStateEvent {
            patient_id: "1".to_string(),
            timestamp: at(1, 11, 0),
            state: SuspendState::Normal,
        },
    ];
    let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();

    for event in &output.effective_basal {
        if event.timestamp >= at(1, 10, 0) && event.timestamp < at(1, 11, 0) {
            assert_eq!(event.rate, 0.0, "sample at {} not zeroed", event.timestamp);
        }
    }
    let end = output
        .effective_basal
        .iter()
        .find(|event| event.timestamp == at(1, 11, 0))
        .unwrap();
    assert_eq!(end.rate, 0.9);

    // 23 hours at 0.9 and one suspended hour.
    assert!((output.daily_doses[0].basal_total - 23.0 * 0.9).abs() < 1e-9);
}

#[test]
fn absolute_temp_basal_reaches_the_grid() {
    let mut streams = PatientStreams::new("1");
    streams.basal = vec![BasalRateEvent::new("1", at(1, 0, 0), 1.0)];
    streams.temp_basal = vec![TempBasalEvent {
        patient_id: "1".to_string(),
        timestamp: at(1, 6, 0),
        kind: TempBasalKind::AbsoluteRate,
        amount: 3.0,
        duration: TimeDelta::hours(2),
    }];
    let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();
    let basal = output.basal.unwrap();

    assert_eq!(basal[71].basal_rate, Some(1.0));
    assert_eq!(basal[72].basal_rate, Some(3.0));
    assert_eq!(basal[95].basal_rate, Some(3.0));
    assert_eq!(basal[96].basal_rate, Some(1.0));
    assert!((output.daily_doses[0].basal_total - 28.0).abs() < 1e-9);
}

#[test]
fn forward_fill_stops_after_a_day() {
    let mut streams = PatientStreams::new("1");
    streams.basal = vec![
        BasalRateEvent::new("1", at(1, 12, 0), 1.0),
        BasalRateEvent::new("1", at(4, 12, 0), 1.0),
    ];
    let output = normalize_patient(&streams, &NormalizationOptions::default()).unwrap();
    let basal = output.basal.unwrap();

    let filled_until = at(2, 11, 55);
    for point in &basal {
        if point.datetime < at(1, 12, 0) {
            assert_eq!(point.basal_rate, None);
        } else if point.datetime <= filled_until {
            assert_eq!(point.basal_rate, Some(1.0));
        } else if point.datetime < at(4, 12, 0) {
            assert_eq!(point.basal_rate, None, "{} should stay null", point.datetime);
        }
    }
    let days: Vec<NaiveDate> = output.daily_doses.iter().map(|dose| dose.date).collect();
    assert_eq!(days, vec![date(1), date(2), date(3), date(4)]);
    assert!(output.daily_doses[2].basal_total.is_nan());
}

#[test]
fn batch_reports_every_patient() {
    let mut study = StudyStreams::default();
    for id in ["p1", "p2", "p3"] {
        study
            .patient_mut(id)
            .cgm
            .push(CgmEvent::new(id, at(1, 9, 0), 140.0));
    }
    study.patient_mut("empty");
    let report = normalize_batch(&study, &NormalizationOptions::default()).unwrap();

    assert_eq!(report.outputs.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert!(report.output("p2").is_some());
    assert!(report.has_errors());
}
