//! Tracing subscriber setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives
pub const LOG_ENV: &str = "V8COV_LOG";

/// Filter used when `V8COV_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info";

/// Output format of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(format: LogFormat) -> bool {
    let builder = fmt().with_env_filter(env_filter()).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).try_init().is_ok(),
        LogFormat::Json => builder.json().with_current_span(false).try_init().is_ok(),
    }
}
