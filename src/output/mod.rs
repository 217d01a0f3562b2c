//! Output formatting module
//!
//! Provides table and JSON output for the CLI.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter, RunOverview};
