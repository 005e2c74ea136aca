//! Subscriber setup from the `[logging]` section

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{AuthError, Result};

/// Install the global subscriber. `RUST_LOG` takes precedence over `config.level`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .try_init(),
        "pretty" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .try_init(),
        other => {
            return Err(AuthError::Config(format!(
                "unknown log format {:?}, expected pretty or json",
                other
            )))
        }
    };

    installed.map_err(|e| AuthError::Config(format!("cannot install log subscriber: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level)
        .map_err(|e| AuthError::Config(format!("invalid log level {:?}: {}", config.level, e)))
}
