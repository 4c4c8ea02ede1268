//! One scan cycle: resolve inputs, run the scan under the timeout, derive
//! metrics and publish them to the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use portwatch_core::{Resolver, ScanReport};
use portwatch_masscan::{ScanConfig, ScanRunner};
use tokio_util::sync::CancellationToken;

use crate::cache::{CycleGuard, MetricsCache};
use crate::error::CycleError;
use crate::metrics::{CycleOutcome, Schema};

/// How long to wait for a cancelled scan to clean up before dropping it.
const MIN_CANCEL_GRACE: Duration = Duration::from_secs(1);

pub struct ScanCycle {
    pub(crate) name: String,
    scan: ScanConfig,
    timeout: Option<Duration>,
    runner: Arc<dyn ScanRunner>,
    resolver: Resolver,
    schema: Arc<Schema>,
}

impl ScanCycle {
    pub fn new(
        name: impl Into<String>,
        scan: ScanConfig,
        timeout: Option<Duration>,
        runner: Arc<dyn ScanRunner>,
        resolver: Resolver,
        schema: Arc<Schema>,
    ) -> Self {
        Self {
            name: name.into(),
            scan,
            timeout,
            runner,
            resolver,
            schema,
        }
    }

    /// Run a cycle that was started at `started`. The caller has already
    /// marked `cache` as collecting. Returns whether the scan succeeded.
    pub async fn run(&self, cache: &MetricsCache, started: DateTime<Utc>) -> bool {
        let guard = CycleGuard::new(cache);
        let clock = Instant::now();

        tracing::info!(collector = %self.name, "Scan cycle started");

        let result = self.scan().await;
        let elapsed = clock.elapsed();

        let report = match &result {
            Ok(report) => {
                tracing::info!(
                    collector = %self.name,
                    scan_id = %report.scan_id,
                    hosts = report.results.len(),
                    open_ports = report.open_port_count(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Scan cycle complete"
                );
                Some(report)
            }
            Err(e) => {
                tracing::error!(
                    collector = %self.name,
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Scan cycle failed"
                );
                None
            }
        };

        let outcome = CycleOutcome {
            started,
            elapsed,
            report,
        };
        let metrics = self.schema.snapshot(&self.name, &outcome).unwrap_or_else(|e| {
            tracing::error!(collector = %self.name, error = %e, "Failed to build scan metrics");
            Vec::new()
        });

        let success = result.is_ok();
        guard.publish(metrics, success);
        success
    }

    async fn scan(&self) -> Result<ScanReport, CycleError> {
        let cancel = CancellationToken::new();

        let work = async {
            let request = self.scan.resolve(&self.resolver).await?;
            tracing::debug!(
                collector = %self.name,
                ranges = ?request.ranges,
                ports = ?request.ports,
                "Resolved scan inputs"
            );
            let report = self.runner.run(&request, cancel.clone()).await?;
            if report.partial {
                return Err(CycleError::Incomplete(report.scan_id.to_string()));
            }
            Ok::<_, CycleError>(report)
        };

        let Some(limit) = self.timeout else {
            return work.await;
        };

        tokio::pin!(work);
        tokio::select! {
            result = &mut work => result,
            _ = tokio::time::sleep(limit) => {
                cancel.cancel();
                let grace = self.scan.wait_delay.max(MIN_CANCEL_GRACE);
                if tokio::time::timeout(grace, &mut work).await.is_err() {
                    tracing::warn!(collector = %self.name, "Cancelled scan did not finish in time, dropping it");
                }
                Err(CycleError::TimedOut(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use portwatch_masscan::{ScanError, ScanFailure, ScanRequest};

    use super::*;
    use crate::metrics::encode_text;

    struct StubRunner {
        delay: Duration,
        fail: bool,
    }

    /// Reports success without merging any results.
    struct IncompleteRunner;

    #[async_trait]
    impl ScanRunner for IncompleteRunner {
        async fn run(&self, request: &ScanRequest, _cancel: CancellationToken) -> Result<ScanReport, ScanFailure> {
            Ok(ScanReport::new(request.ranges.clone(), request.ports.clone(), request.max_rate))
        }
    }

    #[async_trait]
    impl ScanRunner for StubRunner {
        async fn run(
            &self,
            request: &ScanRequest,
            cancel: CancellationToken,
        ) -> Result<ScanReport, ScanFailure> {
            let report = ScanReport::new(request.ranges.clone(), request.ports.clone(), request.max_rate);
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(ScanError::Cancelled.with_report(report)),
            }
            if self.fail {
                return Err(ScanError::Failed {
                    code: 1,
                    output: "FAIL".into(),
                }
                .with_report(report));
            }
            let mut report = report;
            report.complete(Vec::new());
            Ok(report)
        }
    }

    fn cycle(runner: StubRunner, timeout: Option<Duration>) -> ScanCycle {
        ScanCycle::new(
            "test",
            ScanConfig::default().with_ranges(["10.0.0.0/24"]),
            timeout,
            Arc::new(runner),
            Resolver::default(),
            Arc::new(Schema::new(HashMap::new()).unwrap()),
        )
    }

    fn published(cache: &MetricsCache) -> String {
        encode_text(&cache.view().metrics).unwrap()
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes() {
        let cache = MetricsCache::new();
        let cycle = cycle(StubRunner { delay: Duration::ZERO, fail: false }, None);

        cache.begin(Utc::now());
        assert!(cycle.run(&cache, Utc::now()).await);

        assert!(!cache.is_collecting());
        assert!(published(&cache).contains(r#"masscan_scrape_collector_success{collector="test"} 1"#));
    }

    #[tokio::test]
    async fn test_failed_cycle_publishes_failure() {
        let cache = MetricsCache::new();
        let cycle = cycle(StubRunner { delay: Duration::ZERO, fail: true }, None);

        cache.begin(Utc::now());
        assert!(!cycle.run(&cache, Utc::now()).await);

        assert_eq!(cache.failed_current(), 1);
        assert!(published(&cache).contains(r#"masscan_scrape_collector_success{collector="test"} 0"#));
    }

    #[tokio::test]
    async fn test_timeout_cancels_runner() {
        let cycle = cycle(
            StubRunner { delay: Duration::from_secs(30), fail: false },
            Some(Duration::from_millis(50)),
        );

        let start = Instant::now();
        let err = cycle.scan().await.unwrap_err();

        assert!(matches!(err, CycleError::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_resolve_error_fails_cycle() {
        let mut scan = ScanConfig::default();
        scan.ranges = portwatch_core::DynamicValue::File("/nonexistent/portwatch/ranges".into());
        let cycle = ScanCycle::new(
            "test",
            scan,
            None,
            Arc::new(StubRunner { delay: Duration::ZERO, fail: false }),
            Resolver::default(),
            Arc::new(Schema::new(HashMap::new()).unwrap()),
        );

        assert!(matches!(cycle.scan().await, Err(CycleError::Resolve(_))));
    }

    #[tokio::test]
    async fn test_incomplete_report_fails_cycle() {
        let cache = MetricsCache::new();
        let cycle = ScanCycle::new(
            "test",
            ScanConfig::default().with_ranges(["10.0.0.0/24"]),
            None,
            Arc::new(IncompleteRunner),
            Resolver::default(),
            Arc::new(Schema::new(HashMap::new()).unwrap()),
        );

        assert!(matches!(cycle.scan().await, Err(CycleError::Incomplete(_))));

        cache.begin(Utc::now());
        assert!(!cycle.run(&cache, Utc::now()).await);
        let text = published(&cache);
        assert!(text.contains(r#"masscan_scrape_collector_success{collector="test"} 0"#));
        assert!(!text.contains("masscan_ports_open"));
        assert_eq!(cache.failed_current(), 1);
    }
}
