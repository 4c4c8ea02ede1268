//! CLI entry point for the portwatch exporter.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

use portwatch_core::Resolver;
use portwatch_masscan::{MasscanRunner, ScanRunner};

use portwatch_exporter::server::{self, AppState};
use portwatch_exporter::{AppConfig, CronClock, Exporter, NextOccurrence, OnDemandExporter, Schema};

#[derive(Parser)]
#[command(name = "portwatch")]
#[command(about = "Prometheus exporter for scheduled masscan scans")]
struct Cli {
    /// Config file prefix (default: portwatch).
    #[arg(short, long, default_value = "portwatch")]
    config: String,

    /// Override the listen address (e.g., 127.0.0.1:9187).
    #[arg(short, long)]
    listen: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config '{}'", cli.config))?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let clock: Arc<dyn NextOccurrence> = Arc::new(CronClock);
    config.validate(clock.as_ref()).context("Invalid configuration")?;
    let schema = Arc::new(Schema::new(config.exporter.labels.clone()).context("Invalid exporter labels")?);

    if cli.check {
        tracing::info!(
            collectors = config.collectors.len(),
            single_target = config.single_target().is_some(),
            "Configuration OK"
        );
        return Ok(());
    }

    let resolver = Resolver::default();
    let registry = Registry::new();
    let mut state = AppState::new(registry.clone(), &config.server);

    let exporter = if config.collectors.is_empty() {
        None
    } else {
        if config.masscan.is_some() {
            tracing::warn!("Collectors configured, ignoring top-level masscan section");
        }
        for collector in &config.collectors {
            verify_masscan(&MasscanRunner::new(&collector.masscan), &collector.name).await;
        }

        let exporter = Exporter::spawn(
            config.collectors.clone(),
            Arc::clone(&schema),
            resolver.clone(),
            Arc::clone(&clock),
            |c| Arc::new(MasscanRunner::new(&c.masscan)) as Arc<dyn ScanRunner>,
        )
        .context("Failed to start collectors")?;
        exporter.register(&registry)?;
        state = state.with_exporter(&exporter);
        Some(exporter)
    };

    if let Some(scan) = config.single_target() {
        let runner = MasscanRunner::new(scan);
        verify_masscan(&runner, &config.exporter.name).await;

        let on_demand = OnDemandExporter::new(
            &config.exporter,
            scan.clone(),
            Arc::new(runner),
            resolver.clone(),
            Arc::clone(&schema),
        )
        .with_context(|| format!("Failed to start exporter '{}'", config.exporter.name))?;
        on_demand.register(&registry)?;
        state = state.with_on_demand(on_demand);
    } else if exporter.is_none() {
        tracing::warn!("No collectors configured");
    }

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    tracing::info!(listen = %config.server.listen, "Listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(exporter) = exporter {
        exporter.shutdown().await;
        exporter.unregister(&registry)?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn verify_masscan(runner: &MasscanRunner, name: &str) {
    match runner.verify_installation().await {
        Ok(version) => tracing::info!(collector = %name, masscan_version = %version, "Masscan verified"),
        Err(e) => tracing::warn!(collector = %name, error = %e, "Masscan not available, scans will fail"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
