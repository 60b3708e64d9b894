//! Daily dose aggregation.
//!
//! Basal totals integrate the unresampled effective rate stream as a step
//! function. Each calendar midnight gets a support sample carrying the rate in
//! force, so no integration gap crosses a day boundary.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use insulin_model::{
    BasalRateEvent, BolusEvent, DailyDose, ReportedDailyDose, ReportedTddEvent, ReportedTddMethod,
};

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn hours(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 3_600_000.0
}

/// Basal units per calendar day over `effective` (sorted by timestamp).
///
/// Every day from the first to the last sample's date gets an entry. A day
/// without any sample inside `[midnight, next midnight)` is NaN, even when a
/// rate carried over from the previous day would cover it.
pub fn daily_basal_totals(effective: &[BasalRateEvent]) -> BTreeMap<NaiveDate, f64> {
    let (Some(first), Some(last)) = (effective.first(), effective.last()) else {
        return BTreeMap::new();
    };
    let first_day = first.timestamp.date();
    let last_day = last.timestamp.date();

    // (timestamp, rate) with `None` before the first known rate.
    let mut supports: Vec<(NaiveDateTime, Option<f64>)> = effective
        .iter()
        .map(|event| (event.timestamp, Some(event.rate)))
        .collect();
    let mut day = first_day;
    while day <= last_day + TimeDelta::days(1) {
        let boundary = midnight(day);
        let idx = effective.partition_point(|event| event.timestamp < boundary);
        let reported = effective
            .get(idx)
            .is_some_and(|event| event.timestamp == boundary);
        if !reported {
            let carried = idx.checked_sub(1).map(|prev| effective[prev].rate);
            supports.push((boundary, carried));
        }
        day += TimeDelta::days(1);
    }
    supports.sort_by_key(|(timestamp, _)| *timestamp);

    let covered: BTreeSet<NaiveDate> = effective
        .iter()
        .map(|event| event.timestamp.date())
        .collect();
    let mut totals: BTreeMap<NaiveDate, f64> = first_day
        .iter_days()
        .take_while(|day| *day <= last_day)
        .map(|day| (day, if covered.contains(&day) { 0.0 } else { f64::NAN }))
        .collect();

    for pair in supports.windows(2) {
        let (start, rate) = pair[0];
        let (end, _) = pair[1];
        if let Some(total) = totals.get_mut(&start.date()) {
            *total += hours(end - start) * rate.unwrap_or(0.0);
        }
    }
    totals
}

/// Raw bolus units per event date, zero for event-free days inside the span.
pub fn daily_bolus_totals(events: &[BolusEvent]) -> BTreeMap<NaiveDate, f64> {
    let mut totals = BTreeMap::new();
    let (Some(first), Some(last)) = (
        events.iter().map(|event| event.timestamp.date()).min(),
        events.iter().map(|event| event.timestamp.date()).max(),
    ) else {
        return totals;
    };
    for day in first.iter_days().take_while(|day| *day <= last) {
        totals.insert(day, 0.0);
    }
    for event in events {
        *totals.entry(event.timestamp.date()).or_insert(0.0) += event.amount;
    }
    totals
}

/// Outer join of daily basal and bolus totals; a missing side is NaN.
pub fn combine_daily(
    patient_id: &str,
    basal: &BTreeMap<NaiveDate, f64>,
    bolus: &BTreeMap<NaiveDate, f64>,
) -> Vec<DailyDose> {
    let dates: BTreeSet<NaiveDate> = basal.keys().chain(bolus.keys()).copied().collect();
    dates
        .into_iter()
        .map(|date| DailyDose {
            patient_id: patient_id.to_string(),
            date,
            basal_total: basal.get(&date).copied().unwrap_or(f64::NAN),
            bolus_total: bolus.get(&date).copied().unwrap_or(f64::NAN),
        })
        .collect()
}

/// Reduce pump-reported totals to one row per day (or keep all of them).
///
/// `events` must be sorted. `Max` keeps the earliest of equal maxima.
pub fn reduce_reported_tdd(
    patient_id: &str,
    events: &[ReportedTddEvent],
    method: ReportedTddMethod,
) -> Vec<ReportedDailyDose> {
    let row = |event: &ReportedTddEvent| ReportedDailyDose {
        patient_id: patient_id.to_string(),
        date: event.timestamp.date(),
        datetime: Some(event.timestamp),
        tdd: event.tdd,
    };
    if method == ReportedTddMethod::All {
        return events.iter().map(row).collect();
    }

    let mut by_day: BTreeMap<NaiveDate, Vec<&ReportedTddEvent>> = BTreeMap::new();
    for event in events {
        by_day.entry(event.timestamp.date()).or_default().push(event);
    }
    by_day
        .into_iter()
        .filter_map(|(date, day)| match method {
            ReportedTddMethod::Sum => Some(ReportedDailyDose {
                patient_id: patient_id.to_string(),
                date,
                datetime: None,
                tdd: day.iter().map(|event| event.tdd).sum(),
            }),
            ReportedTddMethod::Max => day
                .into_iter()
                .reduce(|best, event| if event.tdd > best.tdd { event } else { best })
                .map(row),
            ReportedTddMethod::Latest | ReportedTddMethod::All => day
                .into_iter()
                .reduce(|latest, event| {
                    if event.timestamp > latest.timestamp {
                        event
                    } else {
                        latest
                    }
                })
                .map(row),
        })
        .collect()
}
