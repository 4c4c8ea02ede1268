//! portwatch-masscan: Masscan runner for the portwatch exporter.
//!
//! Resolves scan inputs, runs masscan as a child process writing its JSON
//! report to a temp file, and merges the output into a `ScanReport`.

pub mod config;
pub mod error;
pub mod masscan;
pub mod output;
pub mod runner;

pub use config::ScanConfig;
pub use error::{ScanError, ScanFailure};
pub use masscan::MasscanRunner;
pub use runner::{ScanRequest, ScanRunner, ToolConfig};
