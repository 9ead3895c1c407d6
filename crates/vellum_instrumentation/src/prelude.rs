//! Re-exports for instrumentation consumers.

pub use crate::config::{AppConfig, AppConfigError};
pub use crate::event::{MetricEvent, TransferDirection};
pub use crate::exporters::{ChannelExporter, ConsoleExporter, JsonlExporter};
pub use crate::logging::{LoggingError, init_logging};
pub use crate::record_metric;
pub use crate::recorder::{EnrichedMetricEvent, MetricExporter, MetricsLayer};

pub use vellum_env::{EnvVar, EnvVarError, EnvVarGuard, Environment, InstrumentEnvVar, LOG_LEVEL, METRICS_CONSOLE, METRICS_JSONL_PATH};

pub use chrono::{DateTime, Utc};
pub use serde_json;
pub use tracing::{Level, info, info_span, subscriber};
pub use tracing_subscriber::{self, layer::SubscriberExt};
