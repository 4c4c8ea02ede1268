//! Configuration for the portwatch exporter.
//!
//! Loaded from a config file (`portwatch.toml`, `.yaml` or `.json`) layered
//! under `PORTWATCH__` environment variables, e.g.
//! `PORTWATCH__SERVER__LISTEN=127.0.0.1:9187`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use portwatch_masscan::ScanConfig;
use serde::Deserialize;

use crate::error::{ExporterError, Result};
use crate::schedule::NextOccurrence;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub exporter: ExporterConfig,

    /// Single-target mode: scanned on demand when metrics are scraped.
    /// Ignored when collectors are configured.
    #[serde(default)]
    pub masscan: Option<ScanConfig>,

    /// Scheduled collectors.
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the metrics server (default: "0.0.0.0:9187").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Report a collector as not ready after this many consecutive failed
    /// scans. 0 disables the collector checks.
    #[serde(default)]
    pub unhealthy_failed_scrapes: u64,
}

/// What to do when a scrape arrives while an on-demand scan is running.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Serve the cached snapshot with `in_progress` set.
    #[default]
    ServeStale,
    /// Answer 429 Too Many Requests.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Collector label value in single-target mode (default: "default").
    #[serde(default = "default_exporter_name")]
    pub name: String,

    /// Per-scan timeout in single-target mode. Unset or zero for none.
    #[serde(default, deserialize_with = "portwatch_core::duration::deserialize_opt")]
    pub timeout: Option<Duration>,

    /// Serve the cached snapshot for this long after a scan starts.
    #[serde(default, deserialize_with = "portwatch_core::duration::deserialize")]
    pub cache_ttl: Duration,

    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Constant labels added to every metric.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A scheduled collector.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Unique collector name, used as the `collector` label.
    #[serde(default)]
    pub name: String,

    /// Cron expression or `@hourly`-style macro, evaluated in UTC. Required.
    #[serde(default)]
    pub schedule: String,

    /// Scan once at startup instead of waiting for the first tick.
    #[serde(default)]
    pub scan_on_start: bool,

    /// Delay before the startup scan.
    #[serde(default, deserialize_with = "portwatch_core::duration::deserialize")]
    pub start_delay: Duration,

    /// Per-scan timeout. Unset or zero for none.
    #[serde(default, deserialize_with = "portwatch_core::duration::deserialize_opt")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub masscan: ScanConfig,

    /// Delay before retrying a failed next-tick computation (default: 1m).
    /// Zero uses the default. Failed scans are never retried early.
    #[serde(
        default = "default_retry_interval",
        deserialize_with = "portwatch_core::duration::deserialize"
    )]
    pub schedule_retry_interval: Duration,

    /// Retries of the next-tick computation before the collector gives up,
    /// 0 for unlimited.
    #[serde(default)]
    pub schedule_retry_limit: u32,
}

fn default_listen() -> String {
    "0.0.0.0:9187".to_string()
}

fn default_exporter_name() -> String {
    "default".to_string()
}

pub(crate) fn default_retry_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            unhealthy_failed_scrapes: 0,
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            name: default_exporter_name(),
            timeout: None,
            cache_ttl: Duration::ZERO,
            busy_policy: BusyPolicy::default(),
            labels: HashMap::new(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            schedule: String::new(),
            scan_on_start: false,
            start_delay: Duration::ZERO,
            timeout: None,
            masscan: ScanConfig::default(),
            schedule_retry_interval: default_retry_interval(),
            schedule_retry_limit: 0,
        }
    }
}

impl AppConfig {
    /// Load from the file `file_prefix` (any supported extension, optional)
    /// and `PORTWATCH__` environment variables.
    pub fn load(file_prefix: &str) -> std::result::Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(config::Environment::with_prefix("PORTWATCH").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Check collector names and schedules.
    pub fn validate(&self, clock: &dyn NextOccurrence) -> Result<()> {
        let mut seen = HashSet::new();

        for collector in &self.collectors {
            if collector.name.trim().is_empty() {
                return Err(ExporterError::NameRequired);
            }
            if !seen.insert(collector.name.as_str()) {
                return Err(ExporterError::DuplicateCollector(collector.name.clone()));
            }
            clock
                .validate(&collector.schedule)
                .map_err(|source| ExporterError::InvalidSchedule {
                    name: collector.name.clone(),
                    source,
                })?;
        }

        if self.exporter.name.trim().is_empty() && self.collectors.is_empty() && self.masscan.is_some() {
            return Err(ExporterError::NameRequired);
        }

        Ok(())
    }

    /// The on-demand scan target, if running in single-target mode.
    pub fn single_target(&self) -> Option<&ScanConfig> {
        if self.collectors.is_empty() {
            self.masscan.as_ref()
        } else {
            None
        }
    }
}
