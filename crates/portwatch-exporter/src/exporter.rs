//! Aggregates scheduled collectors behind one Prometheus collector.

use std::collections::HashSet;
use std::sync::Arc;

use portwatch_core::Resolver;
use portwatch_masscan::ScanRunner;
use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::Registry;

use crate::collector::Collector;
use crate::config::CollectorConfig;
use crate::error::{ExporterError, Result};
use crate::metrics::Schema;
use crate::schedule::NextOccurrence;

/// Fans a metrics read out to every collector's cached snapshot.
///
/// Cheap to clone; clones share the same collectors.
#[derive(Clone)]
pub struct Exporter {
    schema: Arc<Schema>,
    collectors: Arc<Vec<Arc<Collector>>>,
}

impl Exporter {
    /// Spawn one collector per config. `runner_for` builds the scan runner
    /// of each collector.
    ///
    /// Names are checked for duplicates before anything is spawned. If a
    /// collector fails to start, those already started are stopped.
    pub fn spawn<F>(
        configs: Vec<CollectorConfig>,
        schema: Arc<Schema>,
        resolver: Resolver,
        clock: Arc<dyn NextOccurrence>,
        mut runner_for: F,
    ) -> Result<Self>
    where
        F: FnMut(&CollectorConfig) -> Arc<dyn ScanRunner>,
    {
        let mut names = HashSet::new();
        for config in &configs {
            if !config.name.is_empty() && !names.insert(config.name.clone()) {
                return Err(ExporterError::DuplicateCollector(config.name.clone()));
            }
        }

        let mut collectors = Vec::with_capacity(configs.len());
        for config in configs {
            let runner = runner_for(&config);
            match Collector::spawn(config, runner, resolver.clone(), Arc::clone(&clock), Arc::clone(&schema)) {
                Ok(collector) => collectors.push(Arc::new(collector)),
                Err(e) => {
                    for started in &collectors {
                        started.stop();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(collectors = collectors.len(), "Exporter started");

        Ok(Self {
            schema,
            collectors: Arc::new(collectors),
        })
    }

    pub fn collectors(&self) -> &[Arc<Collector>] {
        &self.collectors
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.clone()))?;
        Ok(())
    }

    pub fn unregister(&self, registry: &Registry) -> Result<()> {
        registry.unregister(Box::new(self.clone()))?;
        Ok(())
    }

    /// Stop every collector and wait for their tasks to exit.
    pub async fn shutdown(&self) {
        for collector in self.collectors.iter() {
            collector.stop();
        }
        for collector in self.collectors.iter() {
            collector.shutdown().await;
        }
    }
}

impl PromCollector for Exporter {
    fn desc(&self) -> Vec<&Desc> {
        self.schema.descs()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.collectors.iter().flat_map(|c| c.collect()).collect()
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use portwatch_masscan::MasscanRunner;

    use super::*;
    use crate::metrics::encode_text;
    use crate::schedule::CronClock;

    fn config(name: &str, schedule: &str) -> CollectorConfig {
        CollectorConfig {
            name: name.into(),
            schedule: schedule.into(),
            ..Default::default()
        }
    }

    fn spawn(configs: Vec<CollectorConfig>) -> Result<Exporter> {
        Exporter::spawn(
            configs,
            Arc::new(Schema::new(HashMap::new()).unwrap()),
            Resolver::default(),
            Arc::new(CronClock),
            |c| Arc::new(MasscanRunner::new(&c.masscan)) as Arc<dyn ScanRunner>,
        )
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let err = spawn(vec![config("a", "@daily"), config("a", "@hourly")]).unwrap_err();
        assert!(matches!(err, ExporterError::DuplicateCollector(name) if name == "a"));
    }

    #[tokio::test]
    async fn test_invalid_collector_stops_started_ones() {
        let err = spawn(vec![config("a", "@daily"), config("b", "61 * * * *")]).unwrap_err();
        assert!(matches!(err, ExporterError::InvalidSchedule { name, .. } if name == "b"));
    }

    #[tokio::test]
    async fn test_register_gather_unregister() {
        let exporter = spawn(vec![config("a", "@yearly"), config("b", "@yearly")]).unwrap();
        let registry = Registry::new();

        exporter.register(&registry).unwrap();
        assert!(exporter.register(&registry).is_err());

        let text = encode_text(&registry.gather()).unwrap();
        assert!(text.contains(r#"masscan_scrape_in_progress{collector="a"} 0"#));
        assert!(text.contains(r#"masscan_scrape_in_progress{collector="b"} 0"#));
        assert_eq!(text.matches("# TYPE masscan_scrape_in_progress gauge").count(), 1);

        exporter.unregister(&registry).unwrap();
        assert!(registry.gather().is_empty());

        exporter.shutdown().await;
    }
}
