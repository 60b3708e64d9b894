//! Canonical event streams supplied by source adapters.
//!
//! Every study format is reduced upstream to these value types. The engine
//! only ever sees these streams and never branches on study identity.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;

/// Lower clamp for CGM readings; also the value of the `LOW` sentinel.
pub const CGM_LOW_MG_DL: f64 = 40.0;
/// Upper clamp for CGM readings; also the value of the `HIGH` sentinel.
pub const CGM_HIGH_MG_DL: f64 = 400.0;

const MMOL_TO_MG_DL: f64 = 18.018;

/// Longest bolus delivery or temp basal the engine accepts.
pub const MAX_EVENT_DURATION_DAYS: i64 = 7;

pub fn max_event_duration() -> TimeDelta {
    TimeDelta::days(MAX_EVENT_DURATION_DAYS)
}

/// Identifies one of the canonical streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Bolus,
    Basal,
    Cgm,
    TempBasal,
    Suspend,
    AutoMode,
    ReportedTdd,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Bolus => "bolus",
            StreamKind::Basal => "basal",
            StreamKind::Cgm => "cgm",
            StreamKind::TempBasal => "temp_basal",
            StreamKind::Suspend => "suspend",
            StreamKind::AutoMode => "auto_mode",
            StreamKind::ReportedTdd => "reported_tdd",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything positioned on the time axis.
pub trait TimedEvent {
    fn timestamp(&self) -> NaiveDateTime;
}

/// A discrete insulin dose, optionally delivered over a duration.
#[derive(Debug, Clone, PartialEq)]
pub struct BolusEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    /// Delivered units.
    pub amount: f64,
    /// Zero for immediate boluses.
    pub delivery_duration: TimeDelta,
}

impl BolusEvent {
    pub fn immediate(patient_id: impl Into<String>, timestamp: NaiveDateTime, amount: f64) -> Self {
        Self {
            patient_id: patient_id.into(),
            timestamp,
            amount,
            delivery_duration: TimeDelta::zero(),
        }
    }

    pub fn extended(
        patient_id: impl Into<String>,
        timestamp: NaiveDateTime,
        amount: f64,
        delivery_duration: TimeDelta,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            timestamp,
            amount,
            delivery_duration,
        }
    }
}

impl TimedEvent for BolusEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// A basal rate in U/hr that holds until the next event of the same patient.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalRateEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    pub rate: f64,
}

impl BasalRateEvent {
    pub fn new(patient_id: impl Into<String>, timestamp: NaiveDateTime, rate: f64) -> Self {
        Self {
            patient_id: patient_id.into(),
            timestamp,
            rate,
        }
    }
}

impl TimedEvent for BasalRateEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// How a temporary basal modifies the scheduled rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempBasalKind {
    /// Scheduled rate multiplied by `amount / 100`.
    Percent,
    /// Scheduled rate replaced by `amount` U/hr.
    AbsoluteRate,
}

impl TempBasalKind {
    /// Parse a device label such as `Percent` or `Rate`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "percent" | "pct" | "%" => Some(Self::Percent),
            "rate" | "absolute" | "absoluterate" | "absolute_rate" => Some(Self::AbsoluteRate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempBasalEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    pub kind: TempBasalKind,
    pub amount: f64,
    pub duration: TimeDelta,
}

impl TempBasalEvent {
    /// End of the half-open override interval `[timestamp, timestamp + duration)`.
    ///
    /// `None` when the end is past the representable range.
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.timestamp.checked_add_signed(self.duration)
    }
}

impl TimedEvent for TempBasalEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Pump delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendState {
    Normal,
    Suspended,
}

impl SuspendState {
    /// `NORMAL_PUMPING` and `NORMAL` mean delivery; every other label suspends.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "NORMAL_PUMPING" | "NORMAL" => Self::Normal,
            _ => Self::Suspended,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuspendStateEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    pub state: SuspendState,
}

impl TimedEvent for SuspendStateEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Transition of the closed-loop (automated delivery) flag.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoModeEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    pub active: bool,
}

impl TimedEvent for AutoModeEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Units a CGM stream is reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CgmUnit {
    #[default]
    MgDl,
    MmolL,
}

impl CgmUnit {
    pub fn to_mg_dl(self, value: f64) -> f64 {
        match self {
            CgmUnit::MgDl => value,
            CgmUnit::MmolL => value * MMOL_TO_MG_DL,
        }
    }
}

/// A glucose reading in mg/dL.
#[derive(Debug, Clone, PartialEq)]
pub struct CgmEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl CgmEvent {
    pub fn new(patient_id: impl Into<String>, timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            patient_id: patient_id.into(),
            timestamp,
            value,
        }
    }

    /// Parse a raw device reading, mapping the `LOW`/`HIGH` sentinels.
    ///
    /// ```
    /// use insulin_model::CgmEvent;
    ///
    /// assert_eq!(CgmEvent::parse_value("High"), Some(400.0));
    /// assert_eq!(CgmEvent::parse_value("LOW"), Some(40.0));
    /// assert_eq!(CgmEvent::parse_value(" 112 "), Some(112.0));
    /// assert_eq!(CgmEvent::parse_value("n/a"), None);
    /// ```
    pub fn parse_value(raw: &str) -> Option<f64> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("high") {
            return Some(CGM_HIGH_MG_DL);
        }
        if trimmed.eq_ignore_ascii_case("low") {
            return Some(CGM_LOW_MG_DL);
        }
        trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
    }
}

impl TimedEvent for CgmEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// A total daily dose as reported by the pump itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedTddEvent {
    pub patient_id: String,
    pub timestamp: NaiveDateTime,
    pub tdd: f64,
}

impl TimedEvent for ReportedTddEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// All canonical streams of a single patient.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientStreams {
    pub patient_id: String,
    pub bolus: Vec<BolusEvent>,
    pub basal: Vec<BasalRateEvent>,
    pub cgm: Vec<CgmEvent>,
    pub temp_basal: Vec<TempBasalEvent>,
    pub suspend: Vec<SuspendStateEvent>,
    pub auto_mode: Vec<AutoModeEvent>,
    pub reported_tdd: Vec<ReportedTddEvent>,
}

impl PatientStreams {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Self::default()
        }
    }

    /// True when no stream carries an event that can reach a grid.
    ///
    /// Absolute temp basals count, since they carry their own rate.
    pub fn is_empty(&self) -> bool {
        self.bolus.is_empty()
            && self.basal.is_empty()
            && self.cgm.is_empty()
            && !self
                .temp_basal
                .iter()
                .any(|temp| temp.kind == TempBasalKind::AbsoluteRate)
    }

    /// True when the basal stream needs the overlay passes.
    pub fn has_basal_modifiers(&self) -> bool {
        !(self.temp_basal.is_empty() && self.suspend.is_empty() && self.auto_mode.is_empty())
    }
}

/// Per-patient streams for a whole study, as produced by a source adapter.
#[derive(Debug, Clone, Default)]
pub struct StudyStreams {
    pub patients: BTreeMap<String, PatientStreams>,
    /// Patients whose rows could not be converted; they are reported, not processed.
    pub rejected: BTreeMap<String, NormalizeError>,
}

impl StudyStreams {
    /// Streams for `patient_id`, created on first use.
    pub fn patient_mut(&mut self, patient_id: &str) -> &mut PatientStreams {
        self.patients
            .entry(patient_id.to_string())
            .or_insert_with(|| PatientStreams::new(patient_id))
    }

    /// Move a patient to the rejected set. The first rejection reason wins.
    pub fn reject(&mut self, patient_id: &str, error: NormalizeError) {
        self.patients.remove(patient_id);
        self.rejected.entry(patient_id.to_string()).or_insert(error);
    }

    pub fn is_rejected(&self, patient_id: &str) -> bool {
        self.rejected.contains_key(patient_id)
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len() + self.rejected.len()
    }
}
