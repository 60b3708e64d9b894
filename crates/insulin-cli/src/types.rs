use std::path::PathBuf;

use insulin_model::{BatchReport, NormalizationOptions};

#[derive(Debug)]
pub struct RunResult {
    pub report: BatchReport,
    pub options: NormalizationOptions,
    pub output_dir: Option<PathBuf>,
    pub written: Vec<PathBuf>,
    pub has_errors: bool,
}
