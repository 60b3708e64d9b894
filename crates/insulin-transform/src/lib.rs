//! Temporal normalization engine for insulin and CGM event streams.
//!
//! This crate turns per-patient canonical event streams into fixed 5-minute
//! grids and daily dose summaries:
//!
//! - **order**: checked sort step every stage relies on
//! - **grid**: canonical day-aligned 5-minute timestamp sequences
//! - **dedupe**: per-stream merge rules for events sharing a grid slot
//! - **resample**: nearest-neighbour join onto the grid with a tolerance
//! - **bolus**: mass-conserving expansion of extended boluses
//! - **overlay**: temp basal, closed-loop and suspend overlays on basal rates
//! - **fill**: forward fill bounded by a maximum gap
//! - **cgm**: clamping of glucose readings
//! - **tdd**: daily basal and bolus totals
//! - **pipeline** / **batch**: per-patient processing and the parallel batch runner
//! - **frame**: polars DataFrame adapter for canonical input and output frames

pub mod batch;
pub mod bolus;
pub mod cgm;
pub mod dedupe;
pub mod fill;
pub mod frame;
pub mod grid;
pub mod order;
pub mod overlay;
pub mod pipeline;
pub mod resample;
pub mod tdd;

pub use batch::normalize_batch;
pub use frame::{FrameSource, SourceAdapter};
pub use grid::{GridSeries, build_grid};
pub use order::SortedEvents;
pub use pipeline::normalize_patient;
