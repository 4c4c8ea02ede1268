//! The scan runner seam between scheduling and the scanner process.

use std::path::PathBuf;

use async_trait::async_trait;
use portwatch_core::ScanReport;
use tokio_util::sync::CancellationToken;

use crate::error::ScanFailure;

/// Masscan configuration handed to the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolConfig {
    #[default]
    None,
    /// Config text, written to a temp file for the run.
    Inline(String),
    /// Existing config file on disk.
    Path(PathBuf),
}

/// Fully resolved inputs for one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub ranges: Vec<String>,
    pub ports: Vec<String>,
    pub tool_config: ToolConfig,
    /// Packets per second; 0 leaves the rate to masscan.
    pub max_rate: u32,
}

/// Executes scans.
///
/// Implementations must stop promptly once `cancel` fires, and return a
/// complete (non-partial) report only after all results are merged.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run(
        &self,
        request: &ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanReport, ScanFailure>;
}
