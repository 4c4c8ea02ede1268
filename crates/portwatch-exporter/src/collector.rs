//! Scheduled collector.
//!
//! Each collector owns one tokio task that sleeps until the next tick of
//! its cron schedule, runs a scan cycle and publishes the derived metrics.
//! The read path never waits for a scan: `collect()` returns the last
//! published snapshot together with the live state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portwatch_core::Resolver;
use portwatch_masscan::ScanRunner;
use prometheus::proto::MetricFamily;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::MetricsCache;
use crate::config::{default_retry_interval, CollectorConfig};
use crate::cycle::ScanCycle;
use crate::error::{ExporterError, Result};
use crate::metrics::Schema;
use crate::schedule::NextOccurrence;

/// A running scheduled collector.
pub struct Collector {
    name: String,
    cache: Arc<MetricsCache>,
    schema: Arc<Schema>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Timing settings of the scan loop. The retry settings apply to computing
/// the next tick, never to re-running a failed scan.
struct Timing {
    schedule: String,
    retry_interval: Duration,
    retry_limit: u32,
}

impl Collector {
    /// Validate `config` and spawn the collector task.
    ///
    /// Must be called from within a tokio runtime. Nothing is spawned if
    /// the name is empty or the schedule is invalid.
    pub fn spawn(
        config: CollectorConfig,
        runner: Arc<dyn ScanRunner>,
        resolver: Resolver,
        clock: Arc<dyn NextOccurrence>,
        schema: Arc<Schema>,
    ) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(ExporterError::NameRequired);
        }
        clock
            .validate(&config.schedule)
            .map_err(|source| ExporterError::InvalidSchedule {
                name: config.name.clone(),
                source,
            })?;

        let now = Utc::now();
        // A failed first computation is retried by the task.
        let first = if config.scan_on_start {
            Some(now + chrono::Duration::from_std(config.start_delay).unwrap_or_else(|_| chrono::Duration::zero()))
        } else {
            clock.next_occurrence(&config.schedule, now).ok()
        };

        if !config.masscan.has_targets() {
            tracing::warn!(collector = %config.name, "No ranges or masscan config set, scans will likely fail");
        }

        let name = config.name.clone();
        let cache = Arc::new(MetricsCache::new());
        let stop = CancellationToken::new();
        let timing = Timing {
            schedule: config.schedule.clone(),
            retry_interval: if config.schedule_retry_interval.is_zero() {
                default_retry_interval()
            } else {
                config.schedule_retry_interval
            },
            retry_limit: config.schedule_retry_limit,
        };
        let cycle = ScanCycle::new(
            config.name,
            config.masscan,
            config.timeout,
            runner,
            resolver,
            Arc::clone(&schema),
        );

        tracing::info!(
            collector = %name,
            schedule = %timing.schedule,
            first_scan = ?first,
            "Collector started"
        );

        let task = tokio::spawn(run_loop(cycle, timing, clock, Arc::clone(&cache), stop.clone(), first));

        Ok(Self {
            name,
            cache,
            schema,
            stop,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consecutive failed scans, reset by a successful scan.
    pub fn failed_scrapes(&self) -> u64 {
        self.cache.failed_current()
    }

    /// Completed scans, successful and failed.
    pub fn scrapes_total(&self) -> u64 {
        let live = self.cache.view().live;
        live.succeeded + live.failed
    }

    pub fn is_collecting(&self) -> bool {
        self.cache.is_collecting()
    }

    /// The published snapshot plus live metrics. Never waits on a scan.
    pub fn collect(&self) -> Vec<MetricFamily> {
        let view = self.cache.view();
        let mut families = view.metrics.as_ref().clone();

        match self.schema.live(&self.name, &view.live) {
            Ok(live) => families.extend(live),
            Err(e) => tracing::error!(collector = %self.name, error = %e, "Failed to build live metrics"),
        }

        families
    }

    /// Stop scheduling scans. An in-flight scan runs to completion.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!(collector = %self.name, "Stopping collector");
        }
        self.stop.cancel();
    }

    /// Stop and wait for the collector task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(collector = %self.name, error = %e, "Collector task panicked");
            }
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("name", &self.name)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

async fn run_loop(
    cycle: ScanCycle,
    timing: Timing,
    clock: Arc<dyn NextOccurrence>,
    cache: Arc<MetricsCache>,
    stop: CancellationToken,
    first: Option<DateTime<Utc>>,
) {
    let mut next = first;

    loop {
        let at = match next.take() {
            Some(at) => at,
            None => {
                cache.set_next_start(None);
                match next_tick(&cycle.name, &timing, clock.as_ref(), &stop).await {
                    Some(at) => at,
                    None => break,
                }
            }
        };
        cache.set_next_start(Some(at));

        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        // Failed scans are published as such and wait for the next tick.
        let started = Utc::now();
        cache.begin(started);
        cycle.run(&cache, started).await;

        if stop.is_cancelled() {
            break;
        }
    }

    cache.set_next_start(None);
    tracing::info!(collector = %cycle.name, "Collector stopped");
}

/// Next tick strictly after now.
///
/// A failed computation is retried every `retry_interval` until it
/// succeeds, the collector is stopped or `retry_limit` retries are used up.
async fn next_tick(
    name: &str,
    timing: &Timing,
    clock: &dyn NextOccurrence,
    stop: &CancellationToken,
) -> Option<DateTime<Utc>> {
    let mut retries = 0u32;

    loop {
        match clock.next_occurrence(&timing.schedule, Utc::now()) {
            Ok(at) => {
                tracing::debug!(collector = %name, next_scan = %at, "Next scan scheduled");
                return Some(at);
            }
            Err(e) if timing.retry_limit != 0 && retries >= timing.retry_limit => {
                tracing::error!(collector = %name, error = %e, retries, "Unable to schedule next scan, giving up");
                return None;
            }
            Err(e) => {
                retries += 1;
                tracing::warn!(
                    collector = %name,
                    error = %e,
                    attempt = retries,
                    retry_in = ?timing.retry_interval,
                    "Unable to schedule next scan, retrying"
                );
            }
        }

        tokio::select! {
            _ = stop.cancelled() => return None,
            _ = tokio::time::sleep(timing.retry_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use portwatch_masscan::ScanConfig;

    use super::*;
    use crate::schedule::CronClock;

    struct NeverRunner;

    #[async_trait::async_trait]
    impl ScanRunner for NeverRunner {
        async fn run(
            &self,
            request: &portwatch_masscan::ScanRequest,
            cancel: CancellationToken,
        ) -> std::result::Result<portwatch_core::ScanReport, portwatch_masscan::ScanFailure> {
            cancel.cancelled().await;
            let report = portwatch_core::ScanReport::new(request.ranges.clone(), request.ports.clone(), 0);
            Err(portwatch_masscan::ScanError::Cancelled.with_report(report))
        }
    }

    fn config(name: &str, schedule: &str) -> CollectorConfig {
        CollectorConfig {
            name: name.into(),
            schedule: schedule.into(),
            masscan: ScanConfig::default().with_ranges(["10.0.0.0/24"]),
            ..Default::default()
        }
    }

    fn spawn(config: CollectorConfig) -> Result<Collector> {
        Collector::spawn(
            config,
            Arc::new(NeverRunner),
            Resolver::default(),
            Arc::new(CronClock),
            Arc::new(Schema::new(HashMap::new()).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let err = spawn(config("test", "not-a-cron")).unwrap_err();
        match err {
            ExporterError::InvalidSchedule { name, .. } => assert_eq!(name, "test"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_name_is_required() {
        assert!(matches!(spawn(config("  ", "@hourly")), Err(ExporterError::NameRequired)));
    }

    #[tokio::test]
    async fn test_idle_collector_reports_next_start() {
        let collector = spawn(config("idle", "@yearly")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let text = crate::metrics::encode_text(&collector.collect()).unwrap();
        assert!(text.contains(r#"masscan_scrape_in_progress{collector="idle"} 0"#));
        assert!(text.contains(r#"masscan_scrape_next_start_time{collector="idle"}"#));
        assert!(!text.contains("masscan_scrape_collector_success"));
        assert_eq!(collector.scrapes_total(), 0);

        collector.shutdown().await;
        collector.shutdown().await;
    }
}
