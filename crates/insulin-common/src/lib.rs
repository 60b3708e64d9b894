//! Shared utilities for the insulin normalization crates.
//!
//! Converts polars cell values into the primitive types the canonical event
//! streams need, and parses the datetime and duration spellings device
//! exports use.

pub mod temporal;
pub mod values;

// Re-export commonly used functions at crate root for convenience
pub use temporal::{parse_device_datetime, parse_duration};
pub use values::{
    any_to_bool, any_to_datetime, any_to_duration, any_to_f64, any_to_string, parse_f64,
};
