use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alertsync::clients::{
    AlertSource, GrafanaClient, IncidentApi, JsmClient, PrometheusClient,
};
use alertsync::config::AppConfig;
use alertsync::store::MemoryStore;
use alertsync::sync::SyncService;

#[derive(Parser, Debug)]
#[command(name = "alertsync", about = "Correlates monitoring alerts with incident records")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "alertsync.toml")]
    config: String,

    /// Run a single sync cycle and exit.
    #[arg(long)]
    once: bool,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = tracing_appender::rolling::daily("logs", "alertsync.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` level if RUST_LOG is not set.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration, exiting");
            std::process::exit(1);
        }
    };

    let grafana = GrafanaClient::new(config.grafana.clone());
    let prometheus = PrometheusClient::new(config.prometheus.clone());
    let jsm: Arc<dyn IncidentApi> = Arc::new(JsmClient::new(config.jsm.clone()));
    let store = Arc::new(MemoryStore::new());
    let service = SyncService::new(
        &config.matching,
        config.filter.clone(),
        &config.sync,
        store,
        jsm.clone(),
    );

    let interval = Duration::from_secs(config.sync.interval_seconds);
    let alerts_limit = config.jsm.alerts_limit;
    info!(
        interval_seconds = config.sync.interval_seconds,
        once = args.once,
        "starting sync loop"
    );

    loop {
        let mut alerts = grafana.fetch_monitoring_alerts().await;
        alerts.extend(prometheus.fetch_monitoring_alerts().await);
        let incidents = jsm.fetch_incident_records(alerts_limit).await;

        match service.run_sync_cycle(alerts, incidents).await {
            Ok(report) => info!(
                matched = report.stats.matched,
                incident_only = report.stats.incident_only,
                resolved = report.stats.resolved,
                records = report.records.len(),
                "sync cycle finished"
            ),
            Err(err) => error!(error = %err, "sync cycle failed"),
        }

        if args.once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting");
                break;
            }
        }
    }
}
