//! Tracing subscriber installation.

use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` when set, otherwise `level`.
fn env_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    level_filter(level)
}

fn level_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level).map_err(|e| ConfigError::Invalid {
        key: "logging.level".to_string(),
        message: e.to_string(),
    })
}

/// Installs the global tracing subscriber.
///
/// Uses a human-readable `fmt` layer, or JSON lines when
/// `logging.json` is set.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` for an unparseable level, or
/// `ConfigError::Telemetry` if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = env_filter(&config.level)?;

    let human = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));
    let json = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_current_span(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(json)
        .try_init()
        .map_err(|e| ConfigError::Telemetry(e.to_string()))
}
