//! Library components of the `insulin-normalize` batch runner.

pub mod io;
pub mod logging;
