//! CSV and configuration file handling for the batch runner.
//!
//! Input CSVs are read with every column as text so that identifiers such as
//! `007` and device sentinels such as `LOW` reach the frame adapter untouched.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use insulin_model::{BatchReport, NormalizationOptions, PatientOutput};
use insulin_transform::frame::{
    basal_frame, bolus_frame, cgm_frame, effective_basal_frame, reported_tdd_frame, tdd_frame,
};
use polars::prelude::{CsvReadOptions, CsvWriter, DataFrame, PolarsResult, SerReader, SerWriter};
use tracing::{debug, info};

/// Read one canonical stream CSV.
pub fn read_stream_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("open {}", path.display()))?
        .finish()
        .with_context(|| format!("parse {}", path.display()))?;
    debug!(path = %path.display(), rows = df.height(), "stream loaded");
    Ok(df)
}

/// Write a frame as CSV with a header row.
pub fn write_frame_csv(frame: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(frame)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Load normalization options from a JSON file; missing fields keep their defaults.
pub fn load_options(path: &Path) -> Result<NormalizationOptions> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let options: NormalizationOptions = serde_json::from_str(&text)
        .with_context(|| format!("parse config {}", path.display()))?;
    Ok(options)
}

type FrameBuilder = fn(&[PatientOutput]) -> PolarsResult<DataFrame>;

const OUTPUT_FRAMES: [(&str, FrameBuilder); 6] = [
    ("bolus.csv", bolus_frame),
    ("basal.csv", basal_frame),
    ("cgm.csv", cgm_frame),
    ("effective_basal.csv", effective_basal_frame),
    ("tdd.csv", tdd_frame),
    ("reported_tdd.csv", reported_tdd_frame),
];

/// Write every output frame of a batch into `dir`, skipping empty ones.
///
/// Returns the paths that were written.
pub fn write_outputs(report: &BatchReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut written = Vec::new();
    for (file_name, build) in OUTPUT_FRAMES {
        let mut frame =
            build(&report.outputs).with_context(|| format!("build {file_name} frame"))?;
        if frame.height() == 0 {
            continue;
        }
        let path = dir.join(file_name);
        write_frame_csv(&mut frame, &path)?;
        info!(path = %path.display(), rows = frame.height(), "output written");
        written.push(path);
    }
    Ok(written)
}
