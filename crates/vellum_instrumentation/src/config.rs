//! Process-wide instrumentation configuration.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use vellum_env::{EnvVarError, LOG_LEVEL, METRICS_CONSOLE, METRICS_JSONL_PATH};

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("app configuration already initialised")]
    AlreadyInitialised,
    #[error("invalid log level '{value}'")]
    InvalidLogLevel { value: String },
    #[error("invalid boolean flag '{value}' for {name}")]
    InvalidBoolean { name: &'static str, value: String },
    #[error("failed to access instrumentation environment: {source}")]
    EnvVar {
        #[from]
        source: EnvVarError,
    },
}

/// Logging and metrics settings resolved from `VELLUM_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Default level for the fmt subscriber when `RUST_LOG` is not set.
    pub log_level: Level,
    /// Append metric events as JSON lines to this file.
    pub metrics_jsonl_path: Option<PathBuf>,
    pub enable_console_metrics: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            metrics_jsonl_path: None,
            enable_console_metrics: false,
        }
    }
}

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

impl AppConfig {
    pub fn from_env() -> Result<Self, AppConfigError> {
        let log_level = match LOG_LEVEL.get() {
            Ok(value) => value.unwrap_or(Level::INFO),
            Err(EnvVarError::Parse { value, .. }) => return Err(AppConfigError::InvalidLogLevel { value }),
            Err(err) => return Err(err.into()),
        };

        let metrics_jsonl_path = METRICS_JSONL_PATH.get()?;

        let enable_console_metrics = match METRICS_CONSOLE.get() {
            Ok(value) => value.unwrap_or(false),
            Err(EnvVarError::Parse { value, .. }) => {
                return Err(AppConfigError::InvalidBoolean {
                    name: METRICS_CONSOLE.key(),
                    value,
                });
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            log_level,
            metrics_jsonl_path,
            enable_console_metrics,
        })
    }

    /// Store `config` as the process-wide instance. Fails if one is already set.
    pub fn initialise(config: AppConfig) -> Result<&'static Self, AppConfigError> {
        APP_CONFIG.set(config).map_err(|_| AppConfigError::AlreadyInitialised)?;
        APP_CONFIG.get().ok_or(AppConfigError::AlreadyInitialised)
    }

    /// Return the global instance, loading it from the environment on first use.
    pub fn get_or_init_from_env() -> Result<&'static Self, AppConfigError> {
        if let Some(config) = APP_CONFIG.get() {
            return Ok(config);
        }
        let config = Self::from_env()?;
        Ok(APP_CONFIG.get_or_init(|| config))
    }

    pub fn try_global() -> Option<&'static Self> {
        APP_CONFIG.get()
    }
}
