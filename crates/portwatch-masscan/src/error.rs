//! Error types for the portwatch-masscan crate.

use std::path::PathBuf;

use portwatch_core::ScanReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Exhausted attempts to allocate a temp file in {}", dir.display())]
    TempFileExhausted { dir: PathBuf },

    #[error("Failed to start masscan at path {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Masscan exited with code {code}: {output}")]
    Failed { code: i32, output: String },

    #[error("Masscan run was cancelled")]
    Cancelled,

    #[error("Failed to decode masscan report: {0}")]
    ReportDecode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Attach the (partial) report built before the failure.
    pub fn with_report(self, report: ScanReport) -> ScanFailure {
        ScanFailure {
            report,
            source: self,
        }
    }
}

/// A failed run, carrying the report as far as it was built.
///
/// The report is always partial.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct ScanFailure {
    pub report: ScanReport,
    #[source]
    pub source: ScanError,
}
