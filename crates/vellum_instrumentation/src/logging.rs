//! Subscriber bootstrap: fmt output on stderr plus the metrics layer.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::AppConfig, exporters::{ConsoleExporter, JsonlExporter}, recorder::{MetricExporter, MetricsLayer}
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open metrics file: {0}")]
    Jsonl(#[from] std::io::Error),
    #[error("invalid log filter directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the exporters requested by `config`.
pub fn exporters_for(config: &AppConfig) -> Result<Vec<Box<dyn MetricExporter>>, LoggingError> {
    let mut exporters: Vec<Box<dyn MetricExporter>> = Vec::new();
    if let Some(path) = &config.metrics_jsonl_path {
        exporters.push(Box::new(JsonlExporter::new(path)?));
    }
    if config.enable_console_metrics {
        exporters.push(Box::new(ConsoleExporter));
    }
    Ok(exporters)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when set. `verbosity` raises the
/// default level by one step per count (as produced by `-v` flags).
pub fn init_logging(config: &AppConfig, verbosity: u8) -> Result<(), LoggingError> {
    let default_level = match (config.log_level, verbosity) {
        (level, 0) => LevelFilter::from_level(level),
        (_, 1) => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let fmt_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
        .add_directive("metrics=off".parse()?);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(fmt_filter);

    let exporters = exporters_for(config)?;
    let metrics_layer = (!exporters.is_empty())
        .then(|| MetricsLayer::new(exporters).with_filter(Targets::new().with_target("metrics", LevelFilter::INFO)));

    tracing_subscriber::registry().with(fmt_layer).with(metrics_layer).try_init()?;
    Ok(())
}
