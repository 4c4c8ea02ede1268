//! Scan report types.
//!
//! A report is created partial, and only marked complete once the raw
//! scanner output has been fully parsed and merged into `results`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The outcome of a single scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unique ID for this scan run.
    pub scan_id: Uuid,
    /// Ranges the scan was run against, after resolution.
    pub ranges: Vec<String>,
    /// Ports the scan was run against, after resolution.
    pub ports: Vec<String>,
    pub max_rate: u32,
    /// Observed ports keyed by IP address.
    pub results: BTreeMap<String, HostResult>,
    /// True until raw results have been merged. Never read `results` of a partial report.
    pub partial: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostResult {
    pub ip: String,
    pub ports: Vec<PortResult>,
}

/// One port observation as reported by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub proto: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub ttl: u16,
}

impl PortResult {
    pub fn is_open(&self) -> bool {
        self.status == "open"
    }
}

/// A raw scanner record: one IP with the ports seen in one batch of scanner output.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResult {
    pub ip: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortResult>,
}

impl ScanReport {
    /// Start a new, partial report for the given resolved inputs.
    pub fn new(ranges: Vec<String>, ports: Vec<String>, max_rate: u32) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            ranges,
            ports,
            max_rate,
            results: BTreeMap::new(),
            partial: true,
        }
    }

    /// Merge raw records into `results` and mark the report complete.
    ///
    /// The scanner may emit several records for the same IP; their ports
    /// are appended in output order.
    pub fn complete(&mut self, raw: Vec<RawResult>) {
        for record in raw {
            if record.ports.is_empty() {
                continue;
            }
            let host = self
                .results
                .entry(record.ip.clone())
                .or_insert_with(|| HostResult {
                    ip: record.ip.clone(),
                    ports: Vec::new(),
                });
            host.ports.extend(record.ports);
        }
        self.partial = false;
    }

    /// Total number of port observations across all hosts.
    pub fn port_count(&self) -> usize {
        self.results.values().map(|h| h.ports.len()).sum()
    }

    pub fn open_port_count(&self) -> usize {
        self.results
            .values()
            .flat_map(|h| h.ports.iter())
            .filter(|p| p.is_open())
            .count()
    }
}
