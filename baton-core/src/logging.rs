//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::LoggingError;

/// Environment variable selecting the deployment environment.
pub const ENV_VAR: &str = "BATON_ENV";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human output for development
    Compact,
    /// One JSON object per event, for log shippers
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Reported when logging starts
    pub service: String,
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_directive: String,
}

impl LogConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            format: LogFormat::Compact,
            default_directive: "info".to_string(),
        }
    }

    /// JSON output when `BATON_ENV=production`, compact otherwise.
    pub fn from_env(service: impl Into<String>) -> Self {
        let mut config = Self::new(service);
        if std::env::var(ENV_VAR).is_ok_and(|env| env == "production") {
            config.format = LogFormat::Json;
        }
        config
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
    installed.map_err(|e| LoggingError(e.to_string()))?;

    tracing::info!(service = %config.service, format = ?config.format, "Logging initialised");
    Ok(())
}
