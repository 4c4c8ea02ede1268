//! HTTP server: `/metrics`, `/livez` and `/readyz`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;

use crate::cache::Admission;
use crate::collector::Collector;
use crate::config::{BusyPolicy, ServerConfig};
use crate::exporter::Exporter;
use crate::metrics::encode_text;
use crate::on_demand::OnDemandExporter;

/// A scan source whose failure streak is reported by `/readyz`.
pub trait ScrapeHealth: Send + Sync {
    fn name(&self) -> &str;
    fn failed_scrapes(&self) -> u64;
}

impl ScrapeHealth for Collector {
    fn name(&self) -> &str {
        Collector::name(self)
    }

    fn failed_scrapes(&self) -> u64 {
        Collector::failed_scrapes(self)
    }
}

impl ScrapeHealth for OnDemandExporter {
    fn name(&self) -> &str {
        OnDemandExporter::name(self)
    }

    fn failed_scrapes(&self) -> u64 {
        OnDemandExporter::failed_scrapes(self)
    }
}

#[derive(Clone)]
pub struct AppState {
    registry: Registry,
    unhealthy_failed_scrapes: u64,
    sources: Vec<Arc<dyn ScrapeHealth>>,
    on_demand: Option<OnDemandExporter>,
    busy_policy: BusyPolicy,
}

impl AppState {
    pub fn new(registry: Registry, server: &ServerConfig) -> Self {
        Self {
            registry,
            unhealthy_failed_scrapes: server.unhealthy_failed_scrapes,
            sources: Vec::new(),
            on_demand: None,
            busy_policy: BusyPolicy::default(),
        }
    }

    pub fn with_exporter(mut self, exporter: &Exporter) -> Self {
        self.sources.extend(
            exporter
                .collectors()
                .iter()
                .map(|c| Arc::clone(c) as Arc<dyn ScrapeHealth>),
        );
        self
    }

    pub fn with_on_demand(mut self, exporter: OnDemandExporter) -> Self {
        self.sources.push(Arc::new(exporter.clone()));
        self.busy_policy = exporter.busy_policy();
        self.on_demand = Some(exporter);
        self
    }

    /// Readiness report: healthy flag and one line per check.
    pub fn readiness(&self) -> (bool, String) {
        let mut healthy = true;
        let mut out = String::new();

        if self.sources.is_empty() {
            healthy = false;
            out.push_str("[-]config not ok\n");
        } else {
            out.push_str("[+]config ok\n");
        }

        if self.unhealthy_failed_scrapes > 0 {
            for source in &self.sources {
                if source.failed_scrapes() < self.unhealthy_failed_scrapes {
                    out.push_str(&format!("[+]collector/{} ok\n", source.name()));
                } else {
                    healthy = false;
                    out.push_str(&format!("[-]collector/{} not ok\n", source.name()));
                }
            }
        }

        (healthy, out)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn metrics(State(state): State<AppState>) -> Response {
    let start = Instant::now();

    if let (Some(on_demand), BusyPolicy::Reject) = (&state.on_demand, state.busy_policy) {
        if on_demand.admit() == Admission::Busy {
            tracing::info!("Scan in progress, rejecting scrape");
            return (StatusCode::TOO_MANY_REQUESTS, "scan in progress\n").into_response();
        }
    }

    let families = state.registry.gather();
    let response = match encode_text(&families) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    };

    tracing::info!(
        families = families.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Metrics request complete"
    );

    response
}

async fn livez() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, String) {
    let (healthy, body) = state.readiness();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, body)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use portwatch_core::{Resolver, ScanReport};
    use portwatch_masscan::{ScanConfig, ScanFailure, ScanRequest, ScanRunner};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ExporterConfig;
    use crate::metrics::Schema;

    /// Holds every scan until released.
    struct HeldRunner(Arc<Notify>);

    #[async_trait]
    impl ScanRunner for HeldRunner {
        async fn run(
            &self,
            request: &ScanRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<ScanReport, ScanFailure> {
            self.0.notified().await;
            let mut report = ScanReport::new(request.ranges.clone(), request.ports.clone(), 0);
            report.complete(Vec::new());
            Ok(report)
        }
    }

    struct FakeSource {
        name: &'static str,
        failed: AtomicU64,
    }

    impl ScrapeHealth for FakeSource {
        fn name(&self) -> &str {
            self.name
        }

        fn failed_scrapes(&self) -> u64 {
            self.failed.load(Ordering::SeqCst)
        }
    }

    fn state(threshold: u64, sources: Vec<Arc<dyn ScrapeHealth>>) -> AppState {
        let server = ServerConfig {
            unhealthy_failed_scrapes: threshold,
            ..Default::default()
        };
        let mut state = AppState::new(Registry::new(), &server);
        state.sources = sources;
        state
    }

    async fn request(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_livez() {
        let (status, _) = request(router(state(0, Vec::new())), "/livez").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_without_sources() {
        let (status, body) = request(router(state(0, Vec::new())), "/readyz").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "[-]config not ok\n");
    }

    #[tokio::test]
    async fn test_readyz_failure_threshold() {
        let ok = Arc::new(FakeSource {
            name: "office",
            failed: AtomicU64::new(1),
        });
        let bad = Arc::new(FakeSource {
            name: "dmz",
            failed: AtomicU64::new(3),
        });

        let sources: Vec<Arc<dyn ScrapeHealth>> = vec![ok.clone(), bad.clone()];
        let (status, body) = request(router(state(0, sources.clone())), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[+]config ok\n");

        let (status, body) = request(router(state(3, sources)), "/readyz").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "[+]config ok\n[+]collector/office ok\n[-]collector/dmz not ok\n");

        bad.failed.store(0, Ordering::SeqCst);
        let only_bad: Vec<Arc<dyn ScrapeHealth>> = vec![bad];
        let (status, _) = request(router(state(3, only_bad)), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = Registry::new();
        let counter = prometheus::IntCounter::new("portwatch_test_total", "Test counter").unwrap();
        counter.inc();
        registry.register(Box::new(counter)).unwrap();

        let app = router(AppState::new(registry, &ServerConfig::default()));
        let (status, body) = request(app, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("portwatch_test_total 1"));
    }

    #[tokio::test]
    async fn test_metrics_rejects_while_scanning() {
        let gate = Arc::new(Notify::new());
        let config = ExporterConfig {
            name: "single".into(),
            busy_policy: BusyPolicy::Reject,
            ..Default::default()
        };
        let on_demand = OnDemandExporter::new(
            &config,
            ScanConfig::default().with_ranges(["10.0.0.0/24"]),
            Arc::new(HeldRunner(Arc::clone(&gate))),
            Resolver::default(),
            Arc::new(Schema::new(HashMap::new()).unwrap()),
        )
        .unwrap();
        let registry = Registry::new();
        on_demand.register(&registry).unwrap();
        let state = AppState::new(registry, &ServerConfig::default()).with_on_demand(on_demand.clone());

        let (status, body) = request(router(state.clone()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"masscan_scrape_in_progress{collector="single"} 1"#));

        let (status, _) = request(router(state.clone()), "/metrics").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
