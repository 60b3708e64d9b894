//! Parallel batch runner.
//!
//! Patients share no data, so each one is normalized on the rayon pool and
//! its result collected independently. One patient's failure is recorded in
//! the report and never aborts the batch.

use std::time::Instant;

use insulin_model::{
    BatchReport, NormalizationOptions, NormalizeError, PatientFailure, PatientOutput,
    StudyStreams,
};
use rayon::prelude::*;
use tracing::{info, info_span, warn};

use crate::pipeline::normalize_patient;

/// Normalize every patient of a study.
///
/// Options are validated up front; invalid options fail the whole call.
/// Patients the source adapter rejected are reported as failures next to
/// the ones that fail during processing.
pub fn normalize_batch(
    study: &StudyStreams,
    options: &NormalizationOptions,
) -> Result<BatchReport, NormalizeError> {
    options.validate()?;
    let span = info_span!("batch", patients = study.patient_count());
    let _guard = span.enter();
    let start = Instant::now();

    let results: Vec<(String, Result<PatientOutput, NormalizeError>)> = study
        .patients
        .par_iter()
        .map(|(patient_id, streams)| (patient_id.clone(), normalize_patient(streams, options)))
        .collect();

    let mut report = BatchReport::default();
    for (patient_id, error) in &study.rejected {
        warn!(patient_id = %patient_id, error = %error, "patient rejected at ingest");
        report.failures.push(PatientFailure {
            patient_id: patient_id.clone(),
            error: error.clone(),
        });
    }
    for (patient_id, result) in results {
        match result {
            Ok(output) => report.outputs.push(output),
            Err(error) => {
                warn!(
                    patient_id = %patient_id,
                    category = error.category(),
                    error = %error,
                    "patient skipped"
                );
                report.failures.push(PatientFailure { patient_id, error });
            }
        }
    }
    report
        .failures
        .sort_by(|left, right| left.patient_id.cmp(&right.patient_id));

    info!(
        patients = report.patient_count(),
        normalized = report.outputs.len(),
        failed = report.failures.len(),
        warnings = report.warning_count(),
        duration_ms = start.elapsed().as_millis(),
        "batch complete"
    );
    Ok(report)
}
