mod config;

use crate::config::{CommonConfig, Config, ConfigError, MetricsConfig};
use clap::{Parser, Subcommand};
use failover_router::errors::FailoverError;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics::Metrics;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "tandem";

#[derive(Parser)]
#[command(
    name = "tandem",
    about = "Duplicates HTTP requests to a primary and a secondary upstream"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the failover router
    FailoverRouter(RunArgs),
    /// Print every metric the router emits
    ListMetrics,
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    FailoverRouter(#[from] FailoverError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::FailoverRouter(args) => run_failover_router(args),
        CliCommand::ListMetrics => {
            list_metrics();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            eprintln!("tandem: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_failover_router(args: RunArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config_file_path)?;

    let _sentry = init_logging(&config.common);
    let metrics = init_metrics(config.common.metrics.as_ref())?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    tracing::info!(config = %args.config_file_path.display(), "Starting failover router");
    rt.block_on(failover_router::run(config.failover_router, metrics))?;

    Ok(())
}

/// Installs the tracing subscriber. The returned guard flushes Sentry on drop.
fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let sentry_guard = common.sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    sentry_guard
}

fn init_metrics(config: Option<&MetricsConfig>) -> Result<Metrics, CliError> {
    let Some(config) = config else {
        return Ok(Metrics::new_noop());
    };

    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| CliError::Metrics("a global recorder is already installed".to_string()))?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Reporting metrics to statsd"
    );
    Ok(Metrics::from_recorder())
}

fn list_metrics() {
    for line in metric_lines() {
        println!("{line}");
    }
}

fn metric_lines() -> Vec<String> {
    failover_router::metrics_defs::ALL_METRICS
        .iter()
        .map(|metric| {
            format!(
                "{METRICS_PREFIX}.{} [{}]: {}",
                metric.name,
                metric.tag_keys.join(","),
                metric.description
            )
        })
        .collect()
}
