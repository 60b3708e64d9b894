use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use comfy_table::Table;
use insulin_cli::io::{load_options, read_stream_csv, write_outputs};
use insulin_model::NormalizationOptions;
use insulin_transform::{FrameSource, SourceAdapter, normalize_batch};
use polars::prelude::DataFrame;
use serde_json::Value;
use tracing::{info, info_span};

use crate::cli::RunArgs;
use crate::summary::apply_table_style;
use crate::types::RunResult;

/// Configurable policies: option key, CLI flag, accepted values, meaning.
const POLICIES: [(&str, &str, &str, &str); 10] = [
    (
        "tolerance_seconds",
        "-",
        "0..149",
        "Max distance between a grid point and the sample it takes",
    ),
    (
        "forward_fill_limit_hours",
        "--forward-fill-hours",
        "1..=8784",
        "Basal rates are carried forward for strictly less than this",
    ),
    (
        "basal_duplicates",
        "--basal-duplicates",
        "first, last, max",
        "Basal rate kept when several share a grid slot",
    ),
    (
        "cgm_duplicates",
        "--cgm-duplicates",
        "first, last, max",
        "CGM reading kept when several share a grid slot",
    ),
    (
        "tie_break",
        "--tie-break",
        "prefer_earlier, prefer_later",
        "Sample taken when two are equally close to a grid point",
    ),
    (
        "bolus_attribution",
        "--bolus-attribution",
        "event_date, delivery",
        "Day an extended bolus counts toward",
    ),
    (
        "reported_tdd_method",
        "--reported-tdd-method",
        "max, sum, latest, all",
        "Reduction of several pump-reported totals on one day",
    ),
    ("cgm_floor", "-", "mg/dL", "Lower clamp of CGM readings"),
    ("cgm_ceiling", "-", "mg/dL", "Upper clamp of CGM readings"),
    (
        "mass_tolerance",
        "-",
        ">= 0",
        "Relative tolerance of the bolus mass-conservation check",
    ),
];

pub fn run_policies() -> Result<()> {
    let defaults =
        serde_json::to_value(NormalizationOptions::default()).context("serialize defaults")?;
    let mut table = Table::new();
    table.set_header(vec!["Policy", "Flag", "Default", "Values", "Description"]);
    apply_table_style(&mut table);
    for (key, flag, values, description) in POLICIES {
        let default = defaults.get(key).map_or_else(|| "-".to_string(), render);
        table.add_row(vec![key, flag, default.as_str(), values, description]);
    }
    println!("{table}");
    Ok(())
}

fn render(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

pub fn run_normalize(args: &RunArgs) -> Result<RunResult> {
    let span = info_span!("run");
    let _guard = span.enter();
    let start = Instant::now();

    let options = resolve_options(args)?;
    options.validate().context("validate options")?;

    let source = build_source(args)?;
    let study = source.load().context("load canonical streams")?;
    info!(patients = study.patient_count(), "streams loaded");

    let report = normalize_batch(&study, &options).context("normalize batch")?;
    let written = match &args.output_dir {
        Some(dir) => write_outputs(&report, dir)?,
        None => Vec::new(),
    };

    info!(
        patients = report.patient_count(),
        failed = report.failures.len(),
        files = written.len(),
        duration_ms = start.elapsed().as_millis(),
        "run complete"
    );
    let has_errors = report.has_errors();
    Ok(RunResult {
        report,
        options,
        output_dir: args.output_dir.clone(),
        written,
        has_errors,
    })
}

/// Start from the config file (or defaults) and apply flag overrides.
fn resolve_options(args: &RunArgs) -> Result<NormalizationOptions> {
    let mut options = match &args.config {
        Some(path) => load_options(path)?,
        None => NormalizationOptions::default(),
    };
    if let Some(policy) = args.basal_duplicates {
        options = options.with_basal_duplicates(policy.into());
    }
    if let Some(policy) = args.cgm_duplicates {
        options = options.with_cgm_duplicates(policy.into());
    }
    if let Some(tie_break) = args.tie_break {
        options = options.with_tie_break(tie_break.into());
    }
    if let Some(attribution) = args.bolus_attribution {
        options = options.with_bolus_attribution(attribution.into());
    }
    if let Some(method) = args.reported_tdd_method {
        options = options.with_reported_tdd_method(method.into());
    }
    if let Some(hours) = args.forward_fill_hours {
        options = options.with_forward_fill_limit_hours(hours);
    }
    Ok(options)
}

fn build_source(args: &RunArgs) -> Result<FrameSource> {
    let mut source = FrameSource::new().with_cgm_unit(args.cgm_unit.into());
    if let Some(path) = &args.bolus {
        source = source.with_bolus(read(path)?);
    }
    if let Some(path) = &args.basal {
        source = source.with_basal(read(path)?);
    }
    if let Some(path) = &args.cgm {
        source = source.with_cgm(read(path)?);
    }
    if let Some(path) = &args.temp_basal {
        source = source.with_temp_basal(read(path)?);
    }
    if let Some(path) = &args.suspend {
        source = source.with_suspend(read(path)?);
    }
    if let Some(path) = &args.auto_mode {
        source = source.with_auto_mode(read(path)?);
    }
    if let Some(path) = &args.reported_tdd {
        source = source.with_reported_tdd(read(path)?);
    }
    Ok(source)
}

fn read(path: &Path) -> Result<DataFrame> {
    let ingest_span = info_span!("ingest", path = %path.display());
    ingest_span.in_scope(|| read_stream_csv(path))
}
