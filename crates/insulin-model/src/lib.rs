//! Data model for the insulin and CGM normalization engine.
//!
//! Holds the canonical event streams handed over by source adapters, the
//! grid-aligned outputs produced by the engine, processing options, and the
//! error and report types shared by every crate in the workspace.

pub mod error;
pub mod events;
pub mod options;
pub mod output;
pub mod report;

pub use error::{EmptySeriesError, NormalizeError, Result};
pub use events::{
    AutoModeEvent, BasalRateEvent, BolusEvent, CGM_HIGH_MG_DL, CGM_LOW_MG_DL, CgmEvent, CgmUnit,
    MAX_EVENT_DURATION_DAYS, PatientStreams, ReportedTddEvent, StreamKind, StudyStreams,
    SuspendState, SuspendStateEvent, TempBasalEvent, TempBasalKind, TimedEvent,
    max_event_duration,
};
pub use options::{
    BolusAttribution, DuplicatePolicy, GRID_INTERVAL_MINUTES, MAX_FORWARD_FILL_HOURS,
    NormalizationOptions, TieBreak,
};
pub use output::{
    BasalGridPoint, BolusGridPoint, CgmGridPoint, DailyDose, PatientOutput, ReportedDailyDose,
    ReportedTddMethod,
};
pub use report::{BatchReport, IssueKind, PatientFailure, PolicyIssue};
