//! portwatch-exporter: Scheduled masscan scans served as Prometheus metrics.
//!
//! - `Collector`: one cron-scheduled scan loop with a cached snapshot
//! - `Exporter`: aggregates collectors behind one Prometheus collector
//! - `OnDemandExporter`: single-target mode, scans when scraped
//! - `server`: `/metrics`, `/livez`, `/readyz`

pub mod cache;
pub mod collector;
pub mod config;
pub mod cycle;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod on_demand;
pub mod schedule;
pub mod server;

pub use cache::Admission;
pub use collector::Collector;
pub use config::{AppConfig, BusyPolicy, CollectorConfig, ExporterConfig, ServerConfig};
pub use error::{CycleError, ExporterError};
pub use exporter::Exporter;
pub use metrics::Schema;
pub use on_demand::OnDemandExporter;
pub use schedule::{CronClock, CronSchedule, NextOccurrence, ScheduleError};
