//! Grid-aligned outputs and daily summaries produced by the engine.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::events::BasalRateEvent;
use crate::report::PolicyIssue;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BolusGridPoint {
    pub datetime: NaiveDateTime,
    /// Units delivered in this 5-minute interval; zero when nothing was delivered.
    pub bolus: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasalGridPoint {
    pub datetime: NaiveDateTime,
    /// Effective rate in U/hr after bounded forward fill.
    pub basal_rate: Option<f64>,
    /// Units delivered in this 5-minute interval.
    pub basal_delivery: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CgmGridPoint {
    pub datetime: NaiveDateTime,
    pub cgm: Option<f64>,
}

/// Total daily dose of one patient on one calendar day.
///
/// A total is NaN when its stream has no coverage for the day, which keeps
/// "no data" apart from "zero delivery".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDose {
    pub patient_id: String,
    pub date: NaiveDate,
    pub basal_total: f64,
    pub bolus_total: f64,
}

impl DailyDose {
    /// Basal plus bolus, NaN when either side is unknown.
    pub fn total(&self) -> f64 {
        self.basal_total + self.bolus_total
    }
}

/// How several pump-reported totals of the same day are reduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedTddMethod {
    /// Largest reported value of the day.
    #[default]
    Max,
    /// Sum of all reported values of the day.
    Sum,
    /// Value with the latest timestamp of the day.
    Latest,
    /// Every report, unreduced.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedDailyDose {
    pub patient_id: String,
    pub date: NaiveDate,
    /// Timestamp of the report the value came from; `None` for summed days.
    pub datetime: Option<NaiveDateTime>,
    pub tdd: f64,
}

/// Everything the engine derives for one patient.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientOutput {
    pub patient_id: String,
    /// `None` when the patient has no events in that stream.
    pub bolus: Option<Vec<BolusGridPoint>>,
    pub basal: Option<Vec<BasalGridPoint>>,
    pub cgm: Option<Vec<CgmGridPoint>>,
    /// Basal stream after temp-basal, closed-loop and suspend overlays.
    pub effective_basal: Vec<BasalRateEvent>,
    pub daily_doses: Vec<DailyDose>,
    pub reported_tdd: Vec<ReportedDailyDose>,
    pub issues: Vec<PolicyIssue>,
}

impl PatientOutput {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Self::default()
        }
    }

    pub fn bolus_total(&self) -> f64 {
        self.bolus
            .as_ref()
            .map(|points| points.iter().map(|point| point.bolus).sum())
            .unwrap_or(0.0)
    }

    pub fn basal_delivery_total(&self) -> f64 {
        self.basal
            .as_ref()
            .map(|points| points.iter().filter_map(|point| point.basal_delivery).sum())
            .unwrap_or(0.0)
    }

    /// Fraction of grid points carrying a CGM value.
    pub fn cgm_coverage(&self) -> Option<f64> {
        let points = self.cgm.as_ref()?;
        if points.is_empty() {
            return None;
        }
        let present = points.iter().filter(|point| point.cgm.is_some()).count();
        Some(present as f64 / points.len() as f64)
    }

    pub fn grid_points(&self) -> usize {
        let bolus = self.bolus.as_ref().map_or(0, Vec::len);
        let basal = self.basal.as_ref().map_or(0, Vec::len);
        let cgm = self.cgm.as_ref().map_or(0, Vec::len);
        bolus.max(basal).max(cgm)
    }
}
