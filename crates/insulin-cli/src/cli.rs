//! CLI argument definitions for the normalization runner.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use insulin_model::{BolusAttribution, CgmUnit, DuplicatePolicy, ReportedTddMethod, TieBreak};

#[derive(Parser)]
#[command(
    name = "insulin-normalize",
    version,
    about = "Normalize insulin delivery and CGM streams onto a 5-minute grid",
    long_about = "Normalize device-reported insulin delivery and CGM event streams.\n\n\
                  Aligns bolus, basal and glucose data per patient onto a uniform\n\
                  5-minute grid and derives total daily doses."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Normalize canonical stream CSVs and report per-patient results.
    Run(RunArgs),

    /// List the configurable resolution policies and their defaults.
    Policies,
}

#[derive(Parser)]
#[command(group(
    ArgGroup::new("core_streams")
        .required(true)
        .multiple(true)
        .args(["bolus", "basal", "cgm"])
))]
pub struct RunArgs {
    /// Bolus CSV (patient_id, datetime, bolus, delivery_duration).
    #[arg(long, value_name = "FILE")]
    pub bolus: Option<PathBuf>,

    /// Basal rate CSV (patient_id, datetime, basal_rate).
    #[arg(long, value_name = "FILE")]
    pub basal: Option<PathBuf>,

    /// CGM CSV (patient_id, datetime, cgm).
    #[arg(long, value_name = "FILE")]
    pub cgm: Option<PathBuf>,

    /// Temp basal CSV (patient_id, datetime, temp_basal_type, temp_basal_amount, temp_basal_duration).
    #[arg(long = "temp-basal", value_name = "FILE")]
    pub temp_basal: Option<PathBuf>,

    /// Pump suspend state CSV (patient_id, datetime, suspend).
    #[arg(long, value_name = "FILE")]
    pub suspend: Option<PathBuf>,

    /// Automated delivery flag CSV (patient_id, datetime, auto_mode).
    #[arg(long = "auto-mode", value_name = "FILE")]
    pub auto_mode: Option<PathBuf>,

    /// Pump-reported daily totals CSV (patient_id, datetime, tdd).
    #[arg(long = "reported-tdd", value_name = "FILE")]
    pub reported_tdd: Option<PathBuf>,

    /// JSON file with normalization options. Flags below override its fields.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write resampled streams and daily totals as CSV into this directory.
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Duplicate resolution for basal rates sharing a grid slot.
    #[arg(long = "basal-duplicates", value_enum)]
    pub basal_duplicates: Option<DuplicatePolicyArg>,

    /// Duplicate resolution for CGM readings sharing a grid slot.
    #[arg(long = "cgm-duplicates", value_enum)]
    pub cgm_duplicates: Option<DuplicatePolicyArg>,

    /// Which sample wins when two are equally close to a grid point.
    #[arg(long = "tie-break", value_enum)]
    pub tie_break: Option<TieBreakArg>,

    /// Day a bolus counts toward in daily totals.
    #[arg(long = "bolus-attribution", value_enum)]
    pub bolus_attribution: Option<BolusAttributionArg>,

    /// Reduction of several pump-reported totals on one day.
    #[arg(long = "reported-tdd-method", value_enum)]
    pub reported_tdd_method: Option<ReportedTddMethodArg>,

    /// Hours a basal rate may be carried forward without a new sample.
    #[arg(long = "forward-fill-hours", value_name = "HOURS")]
    pub forward_fill_hours: Option<i64>,

    /// Unit of numeric CGM values.
    #[arg(long = "cgm-unit", value_enum, default_value = "mg-dl")]
    pub cgm_unit: CgmUnitArg,

    /// Print the daily dose table after the summary.
    #[arg(long = "show-tdd")]
    pub show_tdd: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DuplicatePolicyArg {
    First,
    Last,
    Max,
}

impl From<DuplicatePolicyArg> for DuplicatePolicy {
    fn from(arg: DuplicatePolicyArg) -> Self {
        match arg {
            DuplicatePolicyArg::First => DuplicatePolicy::First,
            DuplicatePolicyArg::Last => DuplicatePolicy::Last,
            DuplicatePolicyArg::Max => DuplicatePolicy::Max,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TieBreakArg {
    PreferEarlier,
    PreferLater,
}

impl From<TieBreakArg> for TieBreak {
    fn from(arg: TieBreakArg) -> Self {
        match arg {
            TieBreakArg::PreferEarlier => TieBreak::PreferEarlier,
            TieBreakArg::PreferLater => TieBreak::PreferLater,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BolusAttributionArg {
    EventDate,
    Delivery,
}

impl From<BolusAttributionArg> for BolusAttribution {
    fn from(arg: BolusAttributionArg) -> Self {
        match arg {
            BolusAttributionArg::EventDate => BolusAttribution::EventDate,
            BolusAttributionArg::Delivery => BolusAttribution::Delivery,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportedTddMethodArg {
    Max,
    Sum,
    Latest,
    All,
}

impl From<ReportedTddMethodArg> for ReportedTddMethod {
    fn from(arg: ReportedTddMethodArg) -> Self {
        match arg {
            ReportedTddMethodArg::Max => ReportedTddMethod::Max,
            ReportedTddMethodArg::Sum => ReportedTddMethod::Sum,
            ReportedTddMethodArg::Latest => ReportedTddMethod::Latest,
            ReportedTddMethodArg::All => ReportedTddMethod::All,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CgmUnitArg {
    MgDl,
    MmolL,
}

impl From<CgmUnitArg> for CgmUnit {
    fn from(arg: CgmUnitArg) -> Self {
        match arg {
            CgmUnitArg::MgDl => CgmUnit::MgDl,
            CgmUnitArg::MmolL => CgmUnit::MmolL,
        }
    }
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
