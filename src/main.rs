//! health-probe
//!
//! Actively health checks the hosts of one upstream cluster over HTTP.
//!
//! # Architecture Overview
//!
//! ```text
//!   config (TOML) ──▶ Cluster ──▶ UpstreamHost × N
//!                                      │
//!                       HealthMonitor (one task per host)
//!                                      │ on_interval / on_timeout
//!                                      ▼
//!                          HttpHealthCheckSession
//!                                      │ CodecClient (hyper)
//!                                      ▼
//!                                 backend host
//!                                      │ headers / reset
//!                                      ▼
//!                  HealthCheckSession ──▶ HostHealth (thresholds)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use upstream_health::config::load_config;
use upstream_health::health::{CycleResult, HealthMonitor, HttpHealthChecker};
use upstream_health::lifecycle::{signals, Shutdown};
use upstream_health::observability::{logging, metrics};
use upstream_health::stream::hyper_client::HyperCodecClientFactory;
use upstream_health::upstream::{Cluster, HostSnapshot};

#[derive(Parser)]
#[command(name = "health-probe")]
#[command(about = "Active HTTP health checker for upstream hosts", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Probe every host once, print the result and exit
    #[arg(long)]
    once: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    cluster: &'a str,
    hosts: Vec<HostReport>,
}

#[derive(Serialize)]
struct HostReport {
    #[serde(flatten)]
    host: HostSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_probe: Option<CycleResult>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init_tracing(level);

    tracing::info!(
        config = %cli.config.display(),
        cluster = %config.cluster.name,
        hosts = config.cluster.hosts.len(),
        "health-probe v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let cluster = Cluster::from_config(&config.cluster, &config.health_check);
    let checker = Arc::new(HttpHealthChecker::new(
        cluster.info().clone(),
        &config.health_check,
        Arc::new(HyperCodecClientFactory),
    ));
    let monitor = HealthMonitor::new(checker, config.health_check.clone());

    let mut last_probe = Vec::new();
    if cli.once {
        last_probe = monitor.probe_once(&cluster).await;
    } else {
        let shutdown = Arc::new(Shutdown::new());
        let signal = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { signals::wait_for_ctrl_c(&shutdown).await })
        };

        monitor.run(&cluster, shutdown.subscribe()).await;
        signal.abort();
    }

    let summary = Summary {
        cluster: cluster.info().name(),
        hosts: cluster
            .hosts()
            .iter()
            .map(|host| {
                let snapshot = host.snapshot();
                let last_probe = last_probe
                    .iter()
                    .find(|(addr, _)| *addr == snapshot.address)
                    .map(|(_, result)| *result);
                HostReport {
                    host: snapshot,
                    last_probe,
                }
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tracing::info!("Shutdown complete");
    Ok(())
}
