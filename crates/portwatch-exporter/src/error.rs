//! Error types for the portwatch-exporter crate.

use std::time::Duration;

use portwatch_core::ResolveError;
use portwatch_masscan::ScanFailure;
use thiserror::Error;

use crate::schedule::ScheduleError;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Collector name is required")]
    NameRequired,

    #[error("Invalid schedule for collector {name}: {source}")]
    InvalidSchedule {
        name: String,
        #[source]
        source: ScheduleError,
    },

    #[error("Duplicate collector name: {0}")]
    DuplicateCollector(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;

/// Why a single scan cycle produced no report.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Failed to resolve scan inputs: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanFailure),

    #[error("Scan {0} returned an incomplete report")]
    Incomplete(String),

    #[error("Scan timed out after {0:?}")]
    TimedOut(Duration),
}
