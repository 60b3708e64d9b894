//! Polars adapter for canonical input and output frames.
//!
//! Input frames carry the canonical column names. A missing or mistyped
//! column rejects the whole input; a cell that cannot be interpreted rejects
//! only the patient it belongs to. Rows with a null value cell are dropped.

use chrono::{NaiveDate, NaiveDateTime};
use insulin_common::{any_to_bool, any_to_datetime, any_to_duration, any_to_f64, any_to_string};
use insulin_model::{
    AutoModeEvent, BasalRateEvent, BolusEvent, CgmEvent, CgmUnit, NormalizeError, PatientOutput,
    PatientStreams, ReportedTddEvent, StreamKind, StudyStreams, SuspendState, SuspendStateEvent,
    TempBasalEvent, TempBasalKind,
};
use polars::prelude::{
    AnyValue, Column, DataFrame, DataType, IntoColumn, NamedFrom, PolarsResult, Series,
};
use tracing::{debug, warn};

pub const PATIENT_ID: &str = "patient_id";
pub const DATETIME: &str = "datetime";

/// Produces canonical per-patient streams from some study source.
///
/// The engine consumes only [`StudyStreams`] and never inspects where they
/// came from.
pub trait SourceAdapter {
    fn load(&self) -> Result<StudyStreams, NormalizeError>;
}

/// Canonical streams held as polars DataFrames.
#[derive(Debug, Clone, Default)]
pub struct FrameSource {
    pub bolus: Option<DataFrame>,
    pub basal: Option<DataFrame>,
    pub cgm: Option<DataFrame>,
    pub temp_basal: Option<DataFrame>,
    pub suspend: Option<DataFrame>,
    pub auto_mode: Option<DataFrame>,
    pub reported_tdd: Option<DataFrame>,
    /// Unit of numeric `cgm` cells; sentinels are always mg/dL.
    pub cgm_unit: CgmUnit,
}

impl FrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bolus(mut self, frame: DataFrame) -> Self {
        self.bolus = Some(frame);
        self
    }

    #[must_use]
    pub fn with_basal(mut self, frame: DataFrame) -> Self {
        self.basal = Some(frame);
        self
    }

    #[must_use]
    pub fn with_cgm(mut self, frame: DataFrame) -> Self {
        self.cgm = Some(frame);
        self
    }

    #[must_use]
    pub fn with_temp_basal(mut self, frame: DataFrame) -> Self {
        self.temp_basal = Some(frame);
        self
    }

    #[must_use]
    pub fn with_suspend(mut self, frame: DataFrame) -> Self {
        self.suspend = Some(frame);
        self
    }

    #[must_use]
    pub fn with_auto_mode(mut self, frame: DataFrame) -> Self {
        self.auto_mode = Some(frame);
        self
    }

    #[must_use]
    pub fn with_reported_tdd(mut self, frame: DataFrame) -> Self {
        self.reported_tdd = Some(frame);
        self
    }

    #[must_use]
    pub fn with_cgm_unit(mut self, unit: CgmUnit) -> Self {
        self.cgm_unit = unit;
        self
    }
}

impl SourceAdapter for FrameSource {
    fn load(&self) -> Result<StudyStreams, NormalizeError> {
        let mut study = StudyStreams::default();
        if let Some(df) = &self.bolus {
            read_bolus(df, &mut study)?;
        }
        if let Some(df) = &self.basal {
            read_basal(df, &mut study)?;
        }
        if let Some(df) = &self.cgm {
            read_cgm(df, self.cgm_unit, &mut study)?;
        }
        if let Some(df) = &self.temp_basal {
            read_temp_basal(df, &mut study)?;
        }
        if let Some(df) = &self.suspend {
            read_suspend(df, &mut study)?;
        }
        if let Some(df) = &self.auto_mode {
            read_auto_mode(df, &mut study)?;
        }
        if let Some(df) = &self.reported_tdd {
            read_reported_tdd(df, &mut study)?;
        }
        debug!(
            patients = study.patients.len(),
            rejected = study.rejected.len(),
            "canonical frames loaded"
        );
        Ok(study)
    }
}

// ============================================================================
// Schema checks
// ============================================================================

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn numeric_or_text(dtype: &DataType) -> bool {
    is_numeric(dtype) || matches!(dtype, DataType::String | DataType::Null)
}

fn temporal_or_text(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Datetime(_, _) | DataType::Date | DataType::String | DataType::Null
    )
}

fn duration_like(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Duration(_)) || numeric_or_text(dtype)
}

fn flag_like(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Boolean) || numeric_or_text(dtype)
}

fn any_type(_: &DataType) -> bool {
    true
}

fn require<'a>(
    df: &'a DataFrame,
    stream: StreamKind,
    name: &str,
    accepts: fn(&DataType) -> bool,
) -> Result<&'a Column, NormalizeError> {
    let column = df
        .column(name)
        .map_err(|_| NormalizeError::schema(stream, name, "is missing"))?;
    if !accepts(column.dtype()) {
        return Err(NormalizeError::schema(
            stream,
            name,
            format!("has unsupported type {}", column.dtype()),
        ));
    }
    Ok(column)
}

fn cell(column: &Column, idx: usize) -> AnyValue<'_> {
    column.get(idx).unwrap_or(AnyValue::Null)
}

// ============================================================================
// Row conversion
// ============================================================================

/// Walk the rows of one stream frame, routing each converted event to its patient.
///
/// `convert` returns `Ok(None)` for rows to drop and `Err` to reject the patient.
fn collect_rows<E>(
    df: &DataFrame,
    stream: StreamKind,
    study: &mut StudyStreams,
    mut convert: impl FnMut(&str, NaiveDateTime, usize) -> Result<Option<E>, NormalizeError>,
    push: fn(&mut PatientStreams, E),
) -> Result<(), NormalizeError> {
    let patients = require(df, stream, PATIENT_ID, any_type)?;
    let datetimes = require(df, stream, DATETIME, temporal_or_text)?;
    let mut anonymous = 0usize;

    for idx in 0..df.height() {
        let patient_id = any_to_string(cell(patients, idx));
        if patient_id.is_empty() {
            anonymous += 1;
            continue;
        }
        if study.is_rejected(&patient_id) {
            continue;
        }
        let raw_datetime = cell(datetimes, idx);
        let Some(timestamp) = any_to_datetime(raw_datetime.clone()) else {
            study.reject(
                &patient_id,
                NormalizeError::malformed(&patient_id, DATETIME, any_to_string(raw_datetime)),
            );
            continue;
        };
        match convert(&patient_id, timestamp, idx) {
            Ok(Some(event)) => push(study.patient_mut(&patient_id), event),
            Ok(None) => {}
            Err(error) => study.reject(&patient_id, error),
        }
    }
    if anonymous > 0 {
        warn!(stream = %stream, rows = anonymous, "rows without patient_id dropped");
    }
    Ok(())
}

fn number(
    column: &Column,
    idx: usize,
    patient_id: &str,
    name: &str,
) -> Result<Option<f64>, NormalizeError> {
    let value = cell(column, idx);
    if matches!(value, AnyValue::Null) {
        return Ok(None);
    }
    let raw = any_to_string(value.clone());
    if raw.is_empty() {
        return Ok(None);
    }
    any_to_f64(value)
        .filter(|number| number.is_finite())
        .map(Some)
        .ok_or_else(|| NormalizeError::malformed(patient_id, name, raw))
}

fn read_bolus(df: &DataFrame, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::Bolus;
    let amounts = require(df, stream, "bolus", numeric_or_text)?;
    let durations = require(df, stream, "delivery_duration", duration_like)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            let Some(amount) = number(amounts, idx, patient_id, "bolus")? else {
                return Ok(None);
            };
            let raw = cell(durations, idx);
            let duration = any_to_duration(raw.clone()).ok_or_else(|| {
                NormalizeError::malformed(patient_id, "delivery_duration", any_to_string(raw))
            })?;
            Ok(Some(BolusEvent::extended(patient_id, timestamp, amount, duration)))
        },
        |streams, event| streams.bolus.push(event),
    )
}

fn read_basal(df: &DataFrame, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::Basal;
    let rates = require(df, stream, "basal_rate", numeric_or_text)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            Ok(number(rates, idx, patient_id, "basal_rate")?
                .map(|rate| BasalRateEvent::new(patient_id, timestamp, rate)))
        },
        |streams, event| streams.basal.push(event),
    )
}

fn read_cgm(df: &DataFrame, unit: CgmUnit, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::Cgm;
    let values = require(df, stream, "cgm", numeric_or_text)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            let value = cell(values, idx);
            let value = match value {
                AnyValue::Null => return Ok(None),
                AnyValue::String(_) | AnyValue::StringOwned(_) => {
                    let raw = any_to_string(value);
                    if raw.is_empty() {
                        return Ok(None);
                    }
                    let sentinel =
                        raw.eq_ignore_ascii_case("high") || raw.eq_ignore_ascii_case("low");
                    match CgmEvent::parse_value(&raw) {
                        Some(parsed) if sentinel => parsed,
                        Some(parsed) => unit.to_mg_dl(parsed),
                        None => return Err(NormalizeError::malformed(patient_id, "cgm", raw)),
                    }
                }
                other => match any_to_f64(other) {
                    Some(parsed) if parsed.is_finite() => unit.to_mg_dl(parsed),
                    _ => return Ok(None),
                },
            };
            Ok(Some(CgmEvent::new(patient_id, timestamp, value)))
        },
        |streams, event| streams.cgm.push(event),
    )
}

fn read_temp_basal(df: &DataFrame, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::TempBasal;
    let kinds = require(df, stream, "temp_basal_type", any_type)?;
    let amounts = require(df, stream, "temp_basal_amount", numeric_or_text)?;
    let durations = require(df, stream, "temp_basal_duration", duration_like)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            let Some(amount) = number(amounts, idx, patient_id, "temp_basal_amount")? else {
                return Ok(None);
            };
            let label = any_to_string(cell(kinds, idx));
            let kind = TempBasalKind::from_label(&label)
                .ok_or_else(|| NormalizeError::malformed(patient_id, "temp_basal_type", label))?;
            let raw = cell(durations, idx);
            let duration = any_to_duration(raw.clone()).ok_or_else(|| {
                NormalizeError::malformed(patient_id, "temp_basal_duration", any_to_string(raw))
            })?;
            Ok(Some(TempBasalEvent {
                patient_id: patient_id.to_string(),
                timestamp,
                kind,
                amount,
                duration,
            }))
        },
        |streams, event| streams.temp_basal.push(event),
    )
}

fn read_suspend(df: &DataFrame, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::Suspend;
    let states = require(df, stream, "suspend", any_type)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            let label = any_to_string(cell(states, idx));
            if label.is_empty() {
                return Ok(None);
            }
            Ok(Some(SuspendStateEvent {
                patient_id: patient_id.to_string(),
                timestamp,
                state: SuspendState::from_label(&label),
            }))
        },
        |streams, event| streams.suspend.push(event),
    )
}

fn read_auto_mode(df: &DataFrame, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::AutoMode;
    let flags = require(df, stream, "auto_mode", flag_like)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            let value = cell(flags, idx);
            let raw = any_to_string(value.clone());
            if raw.is_empty() {
                return Ok(None);
            }
            let active = any_to_bool(value)
                .ok_or_else(|| NormalizeError::malformed(patient_id, "auto_mode", raw))?;
            Ok(Some(AutoModeEvent {
                patient_id: patient_id.to_string(),
                timestamp,
                active,
            }))
        },
        |streams, event| streams.auto_mode.push(event),
    )
}

fn read_reported_tdd(df: &DataFrame, study: &mut StudyStreams) -> Result<(), NormalizeError> {
    let stream = StreamKind::ReportedTdd;
    let totals = require(df, stream, "tdd", numeric_or_text)?;
    collect_rows(
        df,
        stream,
        study,
        |patient_id, timestamp, idx| {
            Ok(number(totals, idx, patient_id, "tdd")?.map(|tdd| ReportedTddEvent {
                patient_id: patient_id.to_string(),
                timestamp,
                tdd,
            }))
        },
        |streams, event| streams.reported_tdd.push(event),
    )
}

// ============================================================================
// Output frames
// ============================================================================

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Resampled bolus: `patient_id, datetime, bolus`.
pub fn bolus_frame(outputs: &[PatientOutput]) -> PolarsResult<DataFrame> {
    let mut patient_ids = Vec::new();
    let mut datetimes: Vec<NaiveDateTime> = Vec::new();
    let mut amounts: Vec<f64> = Vec::new();
    for output in outputs {
        for point in output.bolus.iter().flatten() {
            patient_ids.push(output.patient_id.clone());
            datetimes.push(point.datetime);
            amounts.push(point.bolus);
        }
    }
    DataFrame::new(vec![
        Series::new(PATIENT_ID.into(), patient_ids).into_column(),
        Series::new(DATETIME.into(), datetimes).into_column(),
        Series::new("bolus".into(), amounts).into_column(),
    ])
}

/// Resampled basal: `patient_id, datetime, basal_rate, basal_delivery`.
pub fn basal_frame(outputs: &[PatientOutput]) -> PolarsResult<DataFrame> {
    let mut patient_ids = Vec::new();
    let mut datetimes: Vec<NaiveDateTime> = Vec::new();
    let mut rates: Vec<Option<f64>> = Vec::new();
    let mut deliveries: Vec<Option<f64>> = Vec::new();
    for output in outputs {
        for point in output.basal.iter().flatten() {
            patient_ids.push(output.patient_id.clone());
            datetimes.push(point.datetime);
            rates.push(point.basal_rate);
            deliveries.push(point.basal_delivery);
        }
    }
    DataFrame::new(vec![
        Series::new(PATIENT_ID.into(), patient_ids).into_column(),
        Series::new(DATETIME.into(), datetimes).into_column(),
        Series::new("basal_rate".into(), rates).into_column(),
        Series::new("basal_delivery".into(), deliveries).into_column(),
    ])
}

/// Resampled CGM: `patient_id, datetime, cgm`.
pub fn cgm_frame(outputs: &[PatientOutput]) -> PolarsResult<DataFrame> {
    let mut patient_ids = Vec::new();
    let mut datetimes: Vec<NaiveDateTime> = Vec::new();
    let mut values: Vec<Option<f64>> = Vec::new();
    for output in outputs {
        for point in output.cgm.iter().flatten() {
            patient_ids.push(output.patient_id.clone());
            datetimes.push(point.datetime);
            values.push(point.cgm);
        }
    }
    DataFrame::new(vec![
        Series::new(PATIENT_ID.into(), patient_ids).into_column(),
        Series::new(DATETIME.into(), datetimes).into_column(),
        Series::new("cgm".into(), values).into_column(),
    ])
}

/// Effective basal stream before resampling: `patient_id, datetime, basal_rate`.
pub fn effective_basal_frame(outputs: &[PatientOutput]) -> PolarsResult<DataFrame> {
    let mut patient_ids = Vec::new();
    let mut datetimes: Vec<NaiveDateTime> = Vec::new();
    let mut rates: Vec<f64> = Vec::new();
    for output in outputs {
        for event in &output.effective_basal {
            patient_ids.push(output.patient_id.clone());
            datetimes.push(event.timestamp);
            rates.push(event.rate);
        }
    }
    DataFrame::new(vec![
        Series::new(PATIENT_ID.into(), patient_ids).into_column(),
        Series::new(DATETIME.into(), datetimes).into_column(),
        Series::new("basal_rate".into(), rates).into_column(),
    ])
}

/// Daily totals: `patient_id, date, basal_total, bolus_total`; unknown totals are null.
pub fn tdd_frame(outputs: &[PatientOutput]) -> PolarsResult<DataFrame> {
    let mut patient_ids = Vec::new();
    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut basal: Vec<Option<f64>> = Vec::new();
    let mut bolus: Vec<Option<f64>> = Vec::new();
    for dose in outputs.iter().flat_map(|output| output.daily_doses.iter()) {
        patient_ids.push(dose.patient_id.clone());
        dates.push(dose.date);
        basal.push(finite(dose.basal_total));
        bolus.push(finite(dose.bolus_total));
    }
    DataFrame::new(vec![
        Series::new(PATIENT_ID.into(), patient_ids).into_column(),
        Series::new("date".into(), dates).into_column(),
        Series::new("basal_total".into(), basal).into_column(),
        Series::new("bolus_total".into(), bolus).into_column(),
    ])
}

/// Pump-reported totals: `patient_id, date, datetime, tdd`.
pub fn reported_tdd_frame(outputs: &[PatientOutput]) -> PolarsResult<DataFrame> {
    let mut patient_ids = Vec::new();
    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut datetimes: Vec<Option<NaiveDateTime>> = Vec::new();
    let mut totals: Vec<f64> = Vec::new();
    for row in outputs.iter().flat_map(|output| output.reported_tdd.iter()) {
        patient_ids.push(row.patient_id.clone());
        dates.push(row.date);
        datetimes.push(row.datetime);
        totals.push(row.tdd);
    }
    DataFrame::new(vec![
        Series::new(PATIENT_ID.into(), patient_ids).into_column(),
        Series::new("date".into(), dates).into_column(),
        Series::new(DATETIME.into(), datetimes).into_column(),
        Series::new("tdd".into(), totals).into_column(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn frame(columns: Vec<Column>) -> DataFrame {
        DataFrame::new(columns).unwrap()
    }

    fn strings(name: &str, values: &[&str]) -> Column {
        Series::new(name.into(), values).into_column()
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let df = frame(vec![
            strings(PATIENT_ID, &["1"]),
            strings(DATETIME, &["2023-01-01 08:00:00"]),
        ]);
        let source = FrameSource::new().with_basal(df);
        assert_eq!(
            source.load().unwrap_err(),
            NormalizeError::schema(StreamKind::Basal, "basal_rate", "is missing")
        );
    }

    #[test]
    fn test_bolus_rows_convert() {
        let df = frame(vec![
            strings(PATIENT_ID, &["1", "1", "2"]),
            strings(
                DATETIME,
                &["2023-01-01 08:00:00", "01/01/2023 10:00:00 PM", "2023-01-01 09:00:00"],
            ),
            Series::new("bolus".into(), &[Some(2.0), Some(10.0), None]).into_column(),
            strings("delivery_duration", &["", "4:00:00", ""]),
        ]);
        let study = FrameSource::new().with_bolus(df).load().unwrap();
        let boluses = &study.patients["1"].bolus;
        assert_eq!(boluses.len(), 2);
        assert_eq!(boluses[0].delivery_duration, TimeDelta::zero());
        assert_eq!(boluses[1].delivery_duration, TimeDelta::hours(4));
        // A null amount drops the row, leaving patient 2 without events.
        assert!(!study.patients.contains_key("2"));
    }

    #[test]
    fn test_malformed_cell_rejects_only_that_patient() {
        let df = frame(vec![
            strings(PATIENT_ID, &["1", "2", "2"]),
            strings(
                DATETIME,
                &["2023-01-01 08:00:00", "2023-01-01 08:00:00", "2023-01-01 08:05:00"],
            ),
            strings("delivery_duration", &["0:30:00", "bogus", "0:00:00"]),
            Series::new("bolus".into(), &[1.0, 1.0, 1.0]).into_column(),
        ]);
        let study = FrameSource::new().with_bolus(df).load().unwrap();
        assert_eq!(study.patients["1"].bolus.len(), 1);
        assert!(study.is_rejected("2"));
        assert!(!study.patients.contains_key("2"));
    }

    #[test]
    fn test_cgm_sentinels_and_units() {
        let df = frame(vec![
            strings(PATIENT_ID, &["1", "1", "1"]),
            strings(
                DATETIME,
                &["2023-01-01 08:00:00", "2023-01-01 08:05:00", "2023-01-01 08:10:00"],
            ),
            strings("cgm", &["HIGH", "Low", "10"]),
        ]);
        let study = FrameSource::new()
            .with_cgm(df)
            .with_cgm_unit(CgmUnit::MmolL)
            .load()
            .unwrap();
        let values: Vec<f64> = study.patients["1"].cgm.iter().map(|e| e.value).collect();
        assert_eq!(values[0], 400.0);
        assert_eq!(values[1], 40.0);
        assert!((values[2] - 180.18).abs() < 1e-9);
    }

    #[test]
    fn test_modifier_frames() {
        let suspend = frame(vec![
            strings(PATIENT_ID, &["1", "1"]),
            strings(DATETIME, &["2023-01-01 10:00:00", "2023-01-01 11:00:00"]),
            strings("suspend", &["SUSPENDED_BY_USER", "NORMAL_PUMPING"]),
        ]);
        let temp = frame(vec![
            strings(PATIENT_ID, &["1"]),
            strings(DATETIME, &["2023-01-01 12:00:00"]),
            strings("temp_basal_type", &["Percent"]),
            Series::new("temp_basal_amount".into(), &[50.0]).into_column(),
            strings("temp_basal_duration", &["1:00:00"]),
        ]);
        let auto = frame(vec![
            strings(PATIENT_ID, &["1"]),
            strings(DATETIME, &["2023-01-01 13:00:00"]),
            Series::new("auto_mode".into(), &[true]).into_column(),
        ]);
        let study = FrameSource::new()
            .with_suspend(suspend)
            .with_temp_basal(temp)
            .with_auto_mode(auto)
            .load()
            .unwrap();
        let streams = &study.patients["1"];
        assert_eq!(streams.suspend.len(), 2);
        assert_eq!(streams.suspend[0].state, SuspendState::Suspended);
        assert_eq!(streams.temp_basal[0].kind, TempBasalKind::Percent);
        assert!(streams.auto_mode[0].active);
        assert!(streams.has_basal_modifiers());
    }

    #[test]
    fn test_tdd_frame_nulls_unknown_totals() {
        let mut output = PatientOutput::new("1");
        output.daily_doses.push(insulin_model::DailyDose {
            patient_id: "1".to_string(),
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            basal_total: 24.0,
            bolus_total: f64::NAN,
        });
        let df = tdd_frame(&[output]).unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.column("bolus_total").unwrap().null_count(), 1);
        assert_eq!(df.column("basal_total").unwrap().null_count(), 0);
    }
}
