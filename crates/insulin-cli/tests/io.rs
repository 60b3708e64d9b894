//! Integration tests for CSV ingest, configuration loading and output writing.

use std::fs;
use std::path::{Path, PathBuf};

use insulin_cli::io::{load_options, read_stream_csv, write_outputs};
use insulin_model::{DuplicatePolicy, NormalizationOptions, TieBreak};
use insulin_transform::{FrameSource, SourceAdapter, normalize_batch};
use tempfile::TempDir;

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_read_stream_csv_keeps_text_cells() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "cgm.csv",
        "patient_id,datetime,cgm\n007,2023-01-01 08:00:00,LOW\n007,2023-01-01 08:05:00,112\n",
    );

    let df = read_stream_csv(&path).unwrap();

    assert_eq!(df.height(), 2);
    let ids = df.column("patient_id").unwrap().str().unwrap();
    assert_eq!(ids.get(0), Some("007"));
    let values = df.column("cgm").unwrap().str().unwrap();
    assert_eq!(values.get(0), Some("LOW"));
}

#[test]
fn test_read_stream_csv_reports_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = read_stream_csv(&dir.path().join("absent.csv"));
    assert!(result.is_err());
}

#[test]
fn test_csv_streams_normalize_end_to_end() {
    let dir = TempDir::new().unwrap();
    let basal = write_file(
        dir.path(),
        "basal.csv",
        "patient_id,datetime,basal_rate\n\
         007,2023-01-01 00:00:00,1.0\n\
         007,2023-01-01 12:00:00,1.0\n",
    );
    let cgm = write_file(
        dir.path(),
        "cgm.csv",
        "patient_id,datetime,cgm\n\
         007,2023-01-01 08:00:00,LOW\n\
         008,01/02/2023 09:00:00 AM,140\n",
    );

    let study = FrameSource::new()
        .with_basal(read_stream_csv(&basal).unwrap())
        .with_cgm(read_stream_csv(&cgm).unwrap())
        .load()
        .unwrap();
    let report = normalize_batch(&study, &NormalizationOptions::default()).unwrap();

    assert!(report.failures.is_empty());
    let first = report.output("007").unwrap();
    assert!((first.daily_doses[0].basal_total - 24.0).abs() < 1e-9);
    let readings: Vec<f64> = first
        .cgm
        .as_ref()
        .unwrap()
        .iter()
        .filter_map(|point| point.cgm)
        .collect();
    assert_eq!(readings, vec![40.0]);
    assert!(report.output("008").unwrap().basal.is_none());

    let out = dir.path().join("out");
    let written = write_outputs(&report, &out).unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["basal.csv", "cgm.csv", "effective_basal.csv", "tdd.csv"]
    );

    let tdd = read_stream_csv(&out.join("tdd.csv")).unwrap();
    assert_eq!(
        tdd.get_column_names_str(),
        vec!["patient_id", "date", "basal_total", "bolus_total"]
    );
    let basal_total: f64 = tdd
        .column("basal_total")
        .unwrap()
        .str()
        .unwrap()
        .get(0)
        .unwrap()
        .parse()
        .unwrap();
    assert!((basal_total - 24.0).abs() < 1e-9);
}

#[test]
fn test_load_options_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "options.json",
        r#"{"basal_duplicates": "last", "tie_break": "prefer_later"}"#,
    );

    let options = load_options(&path).unwrap();

    assert_eq!(options.basal_duplicates, DuplicatePolicy::Last);
    assert_eq!(options.tie_break, TieBreak::PreferLater);
    assert_eq!(options.cgm_duplicates, DuplicatePolicy::First);
    assert_eq!(options.forward_fill_limit_hours, 24);
}

#[test]
fn test_load_options_rejects_unknown_policy() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "options.json", r#"{"cgm_duplicates": "mean"}"#);

    let error = load_options(&path).unwrap_err();

    assert!(format!("{error:#}").contains("parse config"));
}
