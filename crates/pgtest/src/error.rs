//! Error taxonomy for the test database helpers
//!
//! Setup failures (backend down, container refused to start) are separate
//! variants from readiness timeouts.

use std::sync::Arc;
use std::time::Duration;

use crate::retry::Retryable;

/// Boxed error returned by caller-supplied migrations
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while provisioning or using a test database
#[derive(Debug, thiserror::Error)]
pub enum PgTestError {
    /// The container backend (e.g. the Docker daemon) could not be reached
    #[error("container backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The container could not be started or inspected
    #[error("container setup failed: {0}")]
    ContainerSetup(String),

    /// The database never answered within the readiness budget
    #[error("database not ready after {attempts} attempts in {elapsed:?}: {last_error}")]
    ReadinessTimeout {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    /// A query or connection failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller-supplied migration failed
    #[error("migration failed: {0}")]
    Migration(#[source] BoxError),

    /// Invalid configuration or connection string
    #[error("configuration error: {0}")]
    Config(String),

    /// A connection was requested before the environment was started
    #[error("test database has not been started")]
    NotStarted,

    /// Bootstrap failed; every caller of the same handle observes this error
    #[error("bootstrap failed: {0}")]
    Bootstrap(Arc<PgTestError>),
}

impl PgTestError {
    /// True for failures of the surrounding environment rather than the database itself
    pub fn is_setup_failure(&self) -> bool {
        match self {
            Self::BackendUnavailable(_) | Self::ContainerSetup(_) => true,
            Self::Bootstrap(inner) => inner.is_setup_failure(),
            _ => false,
        }
    }

    /// True if the database did not become reachable in time
    pub fn is_readiness_timeout(&self) -> bool {
        match self {
            Self::ReadinessTimeout { .. } => true,
            Self::Bootstrap(inner) => inner.is_readiness_timeout(),
            _ => false,
        }
    }
}

impl Retryable for sqlx::Error {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

impl Retryable for PgTestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => e.is_retryable(),
            Self::Config(_) | Self::NotStarted | Self::BackendUnavailable(_) => false,
            Self::Bootstrap(inner) => inner.is_retryable(),
            Self::ContainerSetup(_) | Self::ReadinessTimeout { .. } | Self::Migration(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_are_distinguished_from_timeouts() {
        let backend = PgTestError::BackendUnavailable("daemon down".to_string());
        assert!(backend.is_setup_failure());
        assert!(!backend.is_readiness_timeout());

        let timeout = PgTestError::ReadinessTimeout {
            attempts: 7,
            elapsed: Duration::from_secs(120),
            last_error: "connection refused".to_string(),
        };
        assert!(timeout.is_readiness_timeout());
        assert!(!timeout.is_setup_failure());
    }

    #[test]
    fn bootstrap_wrapper_keeps_classification() {
        let err = PgTestError::Bootstrap(Arc::new(PgTestError::ContainerSetup(
            "image not found".to_string(),
        )));
        assert!(err.is_setup_failure());
        assert!(err.to_string().starts_with("bootstrap failed: container setup failed"));
    }

    #[test]
    fn readiness_timeout_display() {
        let err = PgTestError::ReadinessTimeout {
            attempts: 3,
            elapsed: Duration::from_millis(1500),
            last_error: "refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = PgTestError::Database(sqlx::Error::Configuration("bad url".into()));
        assert!(!err.is_retryable());
        assert!(!PgTestError::Config("missing host".to_string()).is_retryable());
        assert!(PgTestError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
