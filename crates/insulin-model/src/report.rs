use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;
use crate::events::StreamKind;
use crate::output::{DailyDose, PatientOutput};

/// What triggered a policy issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Several events shared a grid slot and were merged by policy.
    DuplicateResolved,
    /// Two samples were equally close to a grid point.
    TieBreak,
    /// Input arrived out of order and was sorted.
    UnsortedInput,
    /// A suspend window had no rate to restore at its end.
    SuspendWithoutPriorRate,
    /// A suspend never returned to normal delivery.
    OpenSuspend,
    /// An absolute temp basal ended with no scheduled rate to resume.
    TempWithoutSchedule,
    /// Temp basal, suspend or closed-loop events with no basal rate to act on.
    ModifiersWithoutBasal,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::DuplicateResolved => "duplicate_resolved",
            IssueKind::TieBreak => "tie_break",
            IssueKind::UnsortedInput => "unsorted_input",
            IssueKind::SuspendWithoutPriorRate => "suspend_without_prior_rate",
            IssueKind::OpenSuspend => "open_suspend",
            IssueKind::TempWithoutSchedule => "temp_without_schedule",
            IssueKind::ModifiersWithoutBasal => "modifiers_without_basal",
        }
    }
}

/// An audit record for a policy decision the engine had to take.
///
/// Issues are warnings; a patient whose data cannot be normalized becomes a
/// [`PatientFailure`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyIssue {
    pub patient_id: String,
    pub stream: StreamKind,
    pub kind: IssueKind,
    pub message: String,
    /// Number of occurrences folded into this record.
    pub count: u64,
}

impl PolicyIssue {
    pub fn warning(
        patient_id: &str,
        stream: StreamKind,
        kind: IssueKind,
        count: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            stream,
            kind,
            message: message.into(),
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientFailure {
    pub patient_id: String,
    pub error: NormalizeError,
}

/// Outcome of a batch run: per-patient outputs and isolated failures.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outputs: Vec<PatientOutput>,
    pub failures: Vec<PatientFailure>,
}

impl BatchReport {
    pub fn issues(&self) -> impl Iterator<Item = &PolicyIssue> {
        self.outputs.iter().flat_map(|output| output.issues.iter())
    }

    pub fn warning_count(&self) -> usize {
        self.issues().count()
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn patient_count(&self) -> usize {
        self.outputs.len() + self.failures.len()
    }

    pub fn output(&self, patient_id: &str) -> Option<&PatientOutput> {
        self.outputs
            .iter()
            .find(|output| output.patient_id == patient_id)
    }

    pub fn failure(&self, patient_id: &str) -> Option<&PatientFailure> {
        self.failures
            .iter()
            .find(|failure| failure.patient_id == patient_id)
    }

    /// TDD rows of every successful patient.
    pub fn tdd_table(&self) -> Vec<DailyDose> {
        self.outputs
            .iter()
            .flat_map(|output| output.daily_doses.iter().cloned())
            .collect()
    }
}
