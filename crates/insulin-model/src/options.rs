//! Configuration options for normalization.
//!
//! Every resolution policy that the source studies disagreed on is a named
//! field here instead of a hidden default inside the engine.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{NormalizeError, Result};
use crate::events::{CGM_HIGH_MG_DL, CGM_LOW_MG_DL};
use crate::output::ReportedTddMethod;

/// Width of one grid interval.
pub const GRID_INTERVAL_MINUTES: i64 = 5;

/// Upper bound of `forward_fill_limit_hours` (one year).
pub const MAX_FORWARD_FILL_HOURS: i64 = 24 * 366;

/// Which event survives when several land in the same grid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Earliest reported event of the slot.
    First,
    /// Latest reported event of the slot.
    Last,
    /// Largest value; the earliest one on equal values.
    Max,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DuplicatePolicy::First => "first",
            DuplicatePolicy::Last => "last",
            DuplicatePolicy::Max => "max",
        }
    }
}

/// Which source sample a grid point takes when two are equally close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    PreferEarlier,
    PreferLater,
}

/// Which calendar day a bolus counts toward in the daily totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BolusAttribution {
    /// Date of the bolus event timestamp, regardless of delivery duration.
    #[default]
    EventDate,
    /// Date each expanded 5-minute sub-delivery falls on.
    Delivery,
}

/// Options controlling normalization behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationOptions {
    /// Maximum distance between a grid point and the sample it takes.
    pub tolerance_seconds: i64,
    /// Forward fill stops once this much time has passed since the last known rate.
    pub forward_fill_limit_hours: i64,
    pub basal_duplicates: DuplicatePolicy,
    pub cgm_duplicates: DuplicatePolicy,
    pub tie_break: TieBreak,
    pub bolus_attribution: BolusAttribution,
    pub reported_tdd_method: ReportedTddMethod,
    pub cgm_floor: f64,
    pub cgm_ceiling: f64,
    /// Relative tolerance of the bolus mass-conservation check.
    pub mass_tolerance: f64,
}

impl Default for NormalizationOptions {
    fn default() -> Self {
        Self {
            tolerance_seconds: 149,
            forward_fill_limit_hours: 24,
            basal_duplicates: DuplicatePolicy::Max,
            cgm_duplicates: DuplicatePolicy::First,
            tie_break: TieBreak::PreferEarlier,
            bolus_attribution: BolusAttribution::EventDate,
            reported_tdd_method: ReportedTddMethod::Max,
            cgm_floor: CGM_LOW_MG_DL,
            cgm_ceiling: CGM_HIGH_MG_DL,
            mass_tolerance: 1e-9,
        }
    }
}

impl NormalizationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grid_interval() -> TimeDelta {
        TimeDelta::minutes(GRID_INTERVAL_MINUTES)
    }

    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::seconds(self.tolerance_seconds)
    }

    pub fn forward_fill_limit(&self) -> TimeDelta {
        TimeDelta::try_hours(self.forward_fill_limit_hours).unwrap_or(TimeDelta::MAX)
    }

    #[must_use]
    pub fn with_basal_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.basal_duplicates = policy;
        self
    }

    #[must_use]
    pub fn with_cgm_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.cgm_duplicates = policy;
        self
    }

    #[must_use]
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    #[must_use]
    pub fn with_bolus_attribution(mut self, attribution: BolusAttribution) -> Self {
        self.bolus_attribution = attribution;
        self
    }

    #[must_use]
    pub fn with_reported_tdd_method(mut self, method: ReportedTddMethod) -> Self {
        self.reported_tdd_method = method;
        self
    }

    #[must_use]
    pub fn with_forward_fill_limit_hours(mut self, hours: i64) -> Self {
        self.forward_fill_limit_hours = hours;
        self
    }

    #[must_use]
    pub fn with_tolerance_seconds(mut self, seconds: i64) -> Self {
        self.tolerance_seconds = seconds;
        self
    }

    /// Reject option combinations the engine cannot honor.
    ///
    /// The tolerance must stay below half a grid interval so that adjacent
    /// grid points can never claim the same sample.
    pub fn validate(&self) -> Result<()> {
        let half_interval = Self::grid_interval().num_seconds() / 2;
        if self.tolerance_seconds < 0 || self.tolerance_seconds >= half_interval {
            return Err(NormalizeError::InvalidOptions(format!(
                "tolerance_seconds must be in [0, {half_interval}), got {}",
                self.tolerance_seconds
            )));
        }
        if !(1..=MAX_FORWARD_FILL_HOURS).contains(&self.forward_fill_limit_hours) {
            return Err(NormalizeError::InvalidOptions(format!(
                "forward_fill_limit_hours must be in [1, {MAX_FORWARD_FILL_HOURS}], got {}",
                self.forward_fill_limit_hours
            )));
        }
        if !(self.cgm_floor.is_finite()
            && self.cgm_ceiling.is_finite()
            && self.cgm_floor < self.cgm_ceiling)
        {
            return Err(NormalizeError::InvalidOptions(format!(
                "cgm range [{}, {}] is not a valid interval",
                self.cgm_floor, self.cgm_ceiling
            )));
        }
        if !(self.mass_tolerance.is_finite() && self.mass_tolerance >= 0.0) {
            return Err(NormalizeError::InvalidOptions(format!(
                "mass_tolerance must be a non-negative number, got {}",
                self.mass_tolerance
            )));
        }
        Ok(())
    }
}
