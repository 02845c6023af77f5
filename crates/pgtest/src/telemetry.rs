//! Log output for test binaries
//!
//! Test harnesses capture output per test, so the fmt layer writes through
//! the test writer. Installing twice is harmless: the second call is a no-op.

use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for test logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Log level filter (e.g., "info", "pgtest=debug,sqlx=warn"); `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "pgtest=info,sqlx=warn".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Config with the given default filter
    #[must_use]
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            log_filter: filter.into(),
            ..Self::default()
        }
    }
}

/// Install a global subscriber for the current test binary
///
/// Returns `false` if a subscriber was already installed.
pub fn init_test_tracing(config: &TracingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_test_writer())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_test_writer())
            .try_init()
    }
    .is_ok();

    if installed {
        debug!(filter = %config.log_filter, json = config.json, "Test tracing initialized");
    }
    installed
}
