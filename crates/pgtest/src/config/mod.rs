//! Test database configuration
//!
//! - `PgTestConfig`: image, credentials and time budgets for one test database
//! - `connection`: the connection descriptor rendered into a connection string

mod connection;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use connection::ConnectionConfig;

use crate::error::PgTestError;
use crate::retry::{BackoffConfig, default_max_interval};

/// Configuration for a disposable PostgreSQL container
///
/// Every field has a default, so partial files and struct-update syntax
/// both work:
///
/// ```rust,ignore
/// let config = PgTestConfig { tag: "16-alpine".into(), ..Default::default() };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgTestConfig {
    /// Image repository (default: "postgres")
    #[serde(default = "default_image")]
    pub image: String,

    /// Image tag, usually the major version (default: "15")
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Database created on first start
    #[serde(default = "default_database")]
    pub database: String,

    /// Superuser name
    #[serde(default = "default_user")]
    pub user: String,

    /// Superuser password
    #[serde(default = "default_password")]
    pub password: String,

    /// Readiness budget for an already running database, in seconds
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// Readiness budget for a freshly created container, in seconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Longest pause between readiness probes, in milliseconds
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Hard kill of the container after this many seconds, `None` to disable
    #[serde(default = "default_expire_after")]
    pub expire_after_secs: Option<u64>,
}

fn default_image() -> String {
    "postgres".to_string()
}

fn default_tag() -> String {
    "15".to_string()
}

fn default_database() -> String {
    "test_db".to_string()
}

fn default_user() -> String {
    "test_user".to_string()
}

fn default_password() -> String {
    "secret".to_string()
}

const fn default_max_wait() -> u64 {
    10
}

const fn default_startup_timeout() -> u64 {
    120
}

#[allow(clippy::unnecessary_wraps)]
const fn default_expire_after() -> Option<u64> {
    Some(120)
}

impl Default for PgTestConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            tag: default_tag(),
            database: default_database(),
            user: default_user(),
            password: default_password(),
            max_wait_secs: default_max_wait(),
            startup_timeout_secs: default_startup_timeout(),
            max_interval_ms: default_max_interval(),
            expire_after_secs: default_expire_after(),
        }
    }
}

impl PgTestConfig {
    /// Load from a TOML, YAML or JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PgTestError> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| PgTestError::Config(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), image = %config.image, tag = %config.tag, "Loaded test database config");
        Ok(config)
    }

    /// Backoff used by every `open` and by repeat `start` calls
    #[must_use]
    pub fn steady_state_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_interval_ms: self.max_interval_ms,
            ..BackoffConfig::steady_state()
        }
        .with_max_elapsed(Duration::from_secs(self.max_wait_secs))
    }

    /// Backoff used while the container cold-starts
    #[must_use]
    pub fn cold_start_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_interval_ms: self.max_interval_ms,
            ..BackoffConfig::cold_start()
        }
        .with_max_elapsed(Duration::from_secs(self.startup_timeout_secs))
    }

    /// Hard expiry as a `Duration`
    #[must_use]
    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after_secs.map(Duration::from_secs)
    }

    /// Descriptor for a container reachable at `host_port`
    #[must_use]
    pub fn connection_config(&self, host_port: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig::new(&self.user, &self.password, &self.database)
            .with_host_port(host_port)
            .with_ssl_mode_enabled(false)
    }
}
