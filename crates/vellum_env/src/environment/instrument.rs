//! Logging and metrics environment variables.

use std::path::PathBuf;

use tracing::Level;

use super::{
    EnvVar, parse::{format_bool, format_level, format_path, parse_bool, parse_log_level, parse_path}, value::TypedEnvVar
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstrumentEnvVar {
    /// Maximum level emitted by the fmt subscriber.
    LogLevel,
    /// File that receives one JSON object per metric event.
    MetricsJsonlPath,
    /// Mirror metric events to stdout.
    MetricsConsole,
}

impl InstrumentEnvVar {
    pub const fn key(self) -> &'static str {
        match self {
            InstrumentEnvVar::LogLevel => "VELLUM_LOG_LEVEL",
            InstrumentEnvVar::MetricsJsonlPath => "VELLUM_METRICS_JSONL_PATH",
            InstrumentEnvVar::MetricsConsole => "VELLUM_METRICS_CONSOLE",
        }
    }

    pub const fn into_env(self) -> EnvVar {
        EnvVar::Instrument(self)
    }
}

pub const LOG_LEVEL: TypedEnvVar<Level> = TypedEnvVar::new(InstrumentEnvVar::LogLevel.into_env(), parse_log_level, format_level);

pub const METRICS_JSONL_PATH: TypedEnvVar<PathBuf> =
    TypedEnvVar::new(InstrumentEnvVar::MetricsJsonlPath.into_env(), parse_path, format_path);

pub const METRICS_CONSOLE: TypedEnvVar<bool> = TypedEnvVar::new(InstrumentEnvVar::MetricsConsole.into_env(), parse_bool, format_bool);
