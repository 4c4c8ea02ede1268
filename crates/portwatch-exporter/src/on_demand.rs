//! Single-target exporter that scans when metrics are scraped.
//!
//! A scrape starts a scan in the background unless one is running or the
//! last one started within `cache_ttl`, then serves whatever snapshot is
//! cached. The first scrape therefore only reports `in_progress`.
//!
//! Under `BusyPolicy::Reject` the HTTP layer calls `admit()` itself so it
//! can answer 429, and `collect()` only serves the cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portwatch_core::Resolver;
use portwatch_masscan::{ScanConfig, ScanRunner};
use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::Registry;
use tokio::runtime::Handle;

use crate::cache::{Admission, MetricsCache};
use crate::config::{BusyPolicy, ExporterConfig};
use crate::cycle::ScanCycle;
use crate::error::{ExporterError, Result};
use crate::metrics::Schema;

#[derive(Clone)]
pub struct OnDemandExporter {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    cache_ttl: Duration,
    busy_policy: BusyPolicy,
    cycle: Arc<ScanCycle>,
    cache: Arc<MetricsCache>,
    schema: Arc<Schema>,
    runtime: Handle,
}

impl OnDemandExporter {
    /// Must be called from within a tokio runtime; scans are spawned on it.
    pub fn new(
        config: &ExporterConfig,
        scan: ScanConfig,
        runner: Arc<dyn ScanRunner>,
        resolver: Resolver,
        schema: Arc<Schema>,
    ) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(ExporterError::NameRequired);
        }
        let runtime = Handle::try_current().map_err(|e| ExporterError::Config(e.to_string()))?;

        let cycle = ScanCycle::new(
            config.name.clone(),
            scan,
            config.timeout,
            runner,
            resolver,
            Arc::clone(&schema),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name.clone(),
                cache_ttl: config.cache_ttl,
                busy_policy: config.busy_policy,
                cycle: Arc::new(cycle),
                cache: Arc::new(MetricsCache::new()),
                schema,
                runtime,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn failed_scrapes(&self) -> u64 {
        self.inner.cache.failed_current()
    }

    pub fn busy_policy(&self) -> BusyPolicy {
        self.inner.busy_policy
    }

    /// Decide whether this scrape starts a scan, and start it if so.
    pub fn admit(&self) -> Admission {
        let inner = &self.inner;
        let now = Utc::now();
        let admission = inner.cache.try_begin(now, inner.cache_ttl);

        match admission {
            Admission::Started => {
                let cycle = Arc::clone(&inner.cycle);
                let cache = Arc::clone(&inner.cache);
                inner.runtime.spawn(async move {
                    cycle.run(&cache, now).await;
                });
            }
            Admission::Cached => {
                tracing::debug!(collector = %inner.name, "Serving cached scan results");
            }
            Admission::Busy => {
                tracing::debug!(collector = %inner.name, "Scan in progress, serving previous results");
            }
        }

        admission
    }

    /// The cached snapshot plus live metrics, without admitting a scan.
    pub fn cached(&self) -> Vec<MetricFamily> {
        let inner = &self.inner;
        let view = inner.cache.view();
        let mut families = view.metrics.as_ref().clone();

        match inner.schema.live(&inner.name, &view.live) {
            Ok(live) => families.extend(live),
            Err(e) => tracing::error!(collector = %inner.name, error = %e, "Failed to build live metrics"),
        }

        families
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.clone()))?;
        Ok(())
    }

    pub fn unregister(&self, registry: &Registry) -> Result<()> {
        registry.unregister(Box::new(self.clone()))?;
        Ok(())
    }
}

impl PromCollector for OnDemandExporter {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.schema.descs()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        if self.inner.busy_policy == BusyPolicy::ServeStale {
            self.admit();
        }
        self.cached()
    }
}

impl std::fmt::Debug for OnDemandExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandExporter")
            .field("name", &self.inner.name)
            .field("cache_ttl", &self.inner.cache_ttl)
            .field("busy_policy", &self.inner.busy_policy)
            .finish()
    }
}
