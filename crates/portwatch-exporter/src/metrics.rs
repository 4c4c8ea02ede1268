//! Metric schema shared by collectors and the on-demand exporter.
//!
//! Every family carries a `collector` label. Labels configured on the
//! exporter are attached to every family as constant labels.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portwatch_core::ScanReport;
use prometheus::core::{Collector as _, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, TextEncoder};

/// Name, help text and variable labels of one metric family.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

// ── Per-cycle metrics ──

pub const SCRAPE_SUCCESS: MetricDef = MetricDef {
    name: "masscan_scrape_collector_success",
    help: "Reports if the scrape was successful.",
    labels: &["collector"],
};

pub const SCRAPE_START: MetricDef = MetricDef {
    name: "masscan_scrape_start_time",
    help: "Reports the start time of the scrape.",
    labels: &["collector"],
};

pub const SCRAPE_SECONDS: MetricDef = MetricDef {
    name: "masscan_scrape_seconds",
    help: "Reports how long a scrape took in seconds.",
    labels: &["collector"],
};

pub const PORTS_OPEN: MetricDef = MetricDef {
    name: "masscan_ports_open",
    help: "Masscan port status report",
    labels: &["collector", "ip", "port", "proto", "reason"],
};

// ── Live metrics ──

pub const SCRAPE_IN_PROGRESS: MetricDef = MetricDef {
    name: "masscan_scrape_in_progress",
    help: "Reports if a scrape is in progress.",
    labels: &["collector"],
};

pub const SCRAPE_NEXT_START: MetricDef = MetricDef {
    name: "masscan_scrape_next_start_time",
    help: "Reports the start time for the next scrape.",
    labels: &["collector"],
};

pub const SCRAPES_TOTAL: MetricDef = MetricDef {
    name: "masscan_scrapes_total",
    help: "Total number of scrapes executed for the collector.",
    labels: &["collector", "result"],
};

pub const SCRAPES_FAILED: MetricDef = MetricDef {
    name: "masscan_scrapes_failed_current",
    help: "The number of consecutive scrapes which have failed.",
    labels: &["collector"],
};

const ALL: [MetricDef; 8] = [
    SCRAPE_SUCCESS,
    SCRAPE_START,
    SCRAPE_NEXT_START,
    SCRAPE_SECONDS,
    SCRAPE_IN_PROGRESS,
    SCRAPES_TOTAL,
    SCRAPES_FAILED,
    PORTS_OPEN,
];

/// Result of one scan cycle, as input to [`Schema::snapshot`].
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome<'a> {
    pub started: DateTime<Utc>,
    pub elapsed: Duration,
    /// The completed report, or `None` if the cycle failed.
    pub report: Option<&'a ScanReport>,
}

/// State that changes between cycles, rendered at read time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveState {
    pub in_progress: bool,
    pub succeeded: u64,
    pub failed: u64,
    pub failed_current: u64,
    pub next_start: Option<DateTime<Utc>>,
}

/// Descriptors and builders for all portwatch metric families.
#[derive(Debug)]
pub struct Schema {
    const_labels: HashMap<String, String>,
    descs: Vec<Desc>,
}

impl Schema {
    /// Build the schema. Fails if a constant label is invalid or clashes
    /// with a variable label.
    pub fn new(const_labels: HashMap<String, String>) -> prometheus::Result<Self> {
        let descs = ALL
            .iter()
            .map(|def| {
                Desc::new(
                    def.name.to_string(),
                    def.help.to_string(),
                    def.labels.iter().map(|l| l.to_string()).collect(),
                    const_labels.clone(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self { const_labels, descs })
    }

    pub fn descs(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    /// Derive the metrics published at the end of a cycle.
    pub fn snapshot(&self, collector: &str, outcome: &CycleOutcome<'_>) -> prometheus::Result<Vec<MetricFamily>> {
        let mut families = Vec::new();

        let success = self.gauge_vec(&SCRAPE_SUCCESS)?;
        success
            .get_metric_with_label_values(&[collector])?
            .set(if outcome.report.is_some() { 1.0 } else { 0.0 });
        families.extend(success.collect());

        let start = self.gauge_vec(&SCRAPE_START)?;
        start
            .get_metric_with_label_values(&[collector])?
            .set(outcome.started.timestamp_micros() as f64 / 1e6);
        families.extend(start.collect());

        let seconds = self.gauge_vec(&SCRAPE_SECONDS)?;
        seconds
            .get_metric_with_label_values(&[collector])?
            .set(outcome.elapsed.as_secs_f64());
        families.extend(seconds.collect());

        if let Some(report) = outcome.report {
            let ports = self.gauge_vec(&PORTS_OPEN)?;
            for (ip, host) in &report.results {
                for port in &host.ports {
                    let number = port.port.to_string();
                    ports
                        .get_metric_with_label_values(&[collector, ip, &number, &port.proto, &port.reason])?
                        .set(if port.is_open() { 1.0 } else { 0.0 });
                }
            }
            families.extend(ports.collect());
        }

        Ok(non_empty(families))
    }

    /// Render the live state of a collector.
    pub fn live(&self, collector: &str, state: &LiveState) -> prometheus::Result<Vec<MetricFamily>> {
        let mut families = Vec::new();

        let in_progress = self.gauge_vec(&SCRAPE_IN_PROGRESS)?;
        in_progress
            .get_metric_with_label_values(&[collector])?
            .set(if state.in_progress { 1.0 } else { 0.0 });
        families.extend(in_progress.collect());

        let totals = IntCounterVec::new(self.opts(&SCRAPES_TOTAL), SCRAPES_TOTAL.labels)?;
        totals
            .get_metric_with_label_values(&[collector, "success"])?
            .inc_by(state.succeeded);
        totals
            .get_metric_with_label_values(&[collector, "failure"])?
            .inc_by(state.failed);
        families.extend(totals.collect());

        let failed = self.gauge_vec(&SCRAPES_FAILED)?;
        failed
            .get_metric_with_label_values(&[collector])?
            .set(state.failed_current as f64);
        families.extend(failed.collect());

        if let Some(next) = state.next_start {
            let next_start = self.gauge_vec(&SCRAPE_NEXT_START)?;
            next_start
                .get_metric_with_label_values(&[collector])?
                .set(next.timestamp() as f64);
            families.extend(next_start.collect());
        }

        Ok(non_empty(families))
    }

    fn opts(&self, def: &MetricDef) -> Opts {
        Opts::new(def.name, def.help).const_labels(self.const_labels.clone())
    }

    fn gauge_vec(&self, def: &MetricDef) -> prometheus::Result<GaugeVec> {
        GaugeVec::new(self.opts(def), def.labels)
    }
}

fn non_empty(families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    families
        .into_iter()
        .filter(|mf| !mf.get_metric().is_empty())
        .collect()
}

/// Encode metric families in the Prometheus text exposition format.
pub fn encode_text(families: &[MetricFamily]) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use portwatch_core::{PortResult, RawResult};

    use super::*;

    fn report() -> ScanReport {
        let mut report = ScanReport::new(vec!["10.0.0.0/24".into()], vec!["80".into()], 0);
        report.complete(vec![RawResult {
            ip: "10.0.0.1".into(),
            timestamp: None,
            ports: vec![
                PortResult {
                    port: 80,
                    proto: "tcp".into(),
                    status: "open".into(),
                    reason: "syn-ack".into(),
                    ttl: 64,
                },
                PortResult {
                    port: 81,
                    proto: "tcp".into(),
                    status: "closed".into(),
                    reason: "rst".into(),
                    ttl: 64,
                },
            ],
        }]);
        report
    }

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(250)
    }

    #[test]
    fn test_snapshot_success() {
        let schema = Schema::new(HashMap::new()).unwrap();
        let report = report();
        let families = schema
            .snapshot(
                "test",
                &CycleOutcome {
                    started: started(),
                    elapsed: Duration::from_millis(1500),
                    report: Some(&report),
                },
            )
            .unwrap();
        let text = encode_text(&families).unwrap();

        assert!(text.contains(r#"masscan_scrape_collector_success{collector="test"} 1"#));
        assert!(text.contains(&format!(
            r#"masscan_scrape_start_time{{collector="test"}} {}.25"#,
            started().timestamp()
        )));
        assert!(text.contains(r#"masscan_scrape_seconds{collector="test"} 1.5"#));
        assert!(text.contains(
            r#"masscan_ports_open{collector="test",ip="10.0.0.1",port="80",proto="tcp",reason="syn-ack"} 1"#
        ));
        assert!(text.contains(
            r#"masscan_ports_open{collector="test",ip="10.0.0.1",port="81",proto="tcp",reason="rst"} 0"#
        ));
    }

    #[test]
    fn test_snapshot_failure_has_no_ports() {
        let schema = Schema::new(HashMap::new()).unwrap();
        let families = schema
            .snapshot(
                "test",
                &CycleOutcome {
                    started: started(),
                    elapsed: Duration::ZERO,
                    report: None,
                },
            )
            .unwrap();
        let text = encode_text(&families).unwrap();

        assert!(text.contains(r#"masscan_scrape_collector_success{collector="test"} 0"#));
        assert!(!text.contains("masscan_ports_open"));
    }

    #[test]
    fn test_live_state() {
        let schema = Schema::new(HashMap::new()).unwrap();
        let state = LiveState {
            in_progress: true,
            succeeded: 4,
            failed: 2,
            failed_current: 1,
            next_start: None,
        };
        let text = encode_text(&schema.live("test", &state).unwrap()).unwrap();

        assert!(text.contains(r#"masscan_scrape_in_progress{collector="test"} 1"#));
        assert!(text.contains(r#"masscan_scrapes_total{collector="test",result="success"} 4"#));
        assert!(text.contains(r#"masscan_scrapes_total{collector="test",result="failure"} 2"#));
        assert!(text.contains(r#"masscan_scrapes_failed_current{collector="test"} 1"#));
        assert!(!text.contains("masscan_scrape_next_start_time"));

        let state = LiveState {
            next_start: Some(started()),
            ..state
        };
        let text = encode_text(&schema.live("test", &state).unwrap()).unwrap();
        assert!(text.contains("masscan_scrape_next_start_time"));
    }

    #[test]
    fn test_const_labels() {
        let labels = HashMap::from([("site".to_string(), "lab".to_string())]);
        let schema = Schema::new(labels).unwrap();
        assert_eq!(schema.descs().len(), 8);

        let text = encode_text(&schema.live("test", &LiveState::default()).unwrap()).unwrap();
        assert!(text.contains(r#"masscan_scrape_in_progress{collector="test",site="lab"} 0"#));
    }

    #[test]
    fn test_const_label_clash_is_rejected() {
        let labels = HashMap::from([("collector".to_string(), "x".to_string())]);
        assert!(Schema::new(labels).is_err());
    }
}
