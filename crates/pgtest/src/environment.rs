//! Once-only bootstrap of a disposable database and per-call connections
//!
//! A [`TestDatabase`] owns its configuration and the outcome of its first
//! [`TestDatabase::start`].
//! Provisioning runs at most once per handle, however many tasks call
//! `start` concurrently; all of them observe the same outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgtest::{PgTestConfig, SqlMigration, TestDatabase};
//!
//! let db = TestDatabase::new(PgTestConfig::default());
//! let teardown = db.start().await?;
//!
//! let migration = SqlMigration::new(["CREATE TABLE test (id uuid PRIMARY KEY)"]);
//! let mut conn = db.open_with_migration(&migration).await?;
//! // ... exercise the database ...
//!
//! teardown.run().await?;
//! ```

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::Connection;
use sqlx::postgres::PgConnection;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConnectionConfig, PgTestConfig};
use crate::container::{
    ContainerRuntime, ContainerSpec, DockerRuntime, POSTGRES_PORT, RunningContainer,
};
use crate::error::PgTestError;
use crate::migration::Migration;
use crate::probe::{PingProbe, ReadinessProbe};
use crate::retry::{BackoffConfig, RetryError, retry};

/// State written once by the winning bootstrap, read-only afterwards
#[derive(Debug)]
struct EnvironmentState {
    host_port: String,
    connection: ConnectionConfig,
    connection_string: String,
    teardown: Teardown,
}

type SharedOutcome = Result<Arc<EnvironmentState>, Arc<PgTestError>>;

/// A disposable PostgreSQL database owned by the caller
#[derive(Debug)]
pub struct TestDatabase {
    config: PgTestConfig,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn ReadinessProbe>,
    state: OnceCell<SharedOutcome>,
}

impl TestDatabase {
    /// Docker-backed database using [`PingProbe`] for readiness
    pub fn new(config: PgTestConfig) -> Self {
        Self::with_components(config, Arc::new(DockerRuntime), Arc::new(PingProbe))
    }

    /// Database with a custom container runtime and readiness probe
    pub fn with_components(
        config: PgTestConfig,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            config,
            runtime,
            probe,
            state: OnceCell::new(),
        }
    }

    /// Configuration fixed at construction
    pub fn config(&self) -> &PgTestConfig {
        &self.config
    }

    /// Provision the database on first call; later calls reuse the result
    ///
    /// Every call finishes with a steady-state readiness check against the
    /// published connection string.
    #[instrument(skip(self), fields(image = %self.config.image, tag = %self.config.tag))]
    pub async fn start(&self) -> Result<Teardown, PgTestError> {
        let outcome = self
            .state
            .get_or_init(|| async { self.bootstrap().await.map(Arc::new).map_err(Arc::new) })
            .await;
        let state = outcome.clone().map_err(PgTestError::Bootstrap)?;

        self.await_ready(&state.connection, &self.config.steady_state_backoff())
            .await?;

        Ok(state.teardown.clone())
    }

    async fn bootstrap(&self) -> Result<EnvironmentState, PgTestError> {
        self.runtime.ping().await?;

        let spec = ContainerSpec::from_config(&self.config);
        let container = self.runtime.run(&spec).await?;
        let host_port = container.host_port(POSTGRES_PORT).await?;

        let connection = self.config.connection_config(&host_port);
        let connection_string = connection.format_dsn();
        debug!(connection_string = %connection_string, "Connecting to database");

        let expiry = self.config.expire_after();
        if let Some(after) = expiry {
            if let Err(e) = container.arm_expiry(after).await {
                warn!(error = %e, "Could not arm container expiry, relying on in-process watchdog");
            }
        }

        let teardown = Teardown::new(container);
        if let Some(after) = expiry {
            teardown.expire_after(after);
        }

        self.await_ready(&connection, &self.config.cold_start_backoff())
            .await?;

        info!(
            container_id = %teardown.container_id(),
            host_port = %host_port,
            "Test database ready"
        );

        Ok(EnvironmentState {
            host_port,
            connection,
            connection_string,
            teardown,
        })
    }

    async fn await_ready(
        &self,
        connection: &ConnectionConfig,
        backoff: &BackoffConfig,
    ) -> Result<(), PgTestError> {
        let probe = self.probe.as_ref();
        retry(backoff, move || probe.probe(connection))
            .await
            .map_err(readiness_error)
    }

    fn published(&self) -> Result<&EnvironmentState, PgTestError> {
        match self.state.get() {
            None => Err(PgTestError::NotStarted),
            Some(Err(e)) => Err(PgTestError::Bootstrap(Arc::clone(e))),
            Some(Ok(state)) => Ok(state),
        }
    }

    /// Connection string published by the bootstrap
    pub fn connection_string(&self) -> Option<&str> {
        self.published().ok().map(|s| s.connection_string.as_str())
    }

    /// Host-visible `host:port` of the container
    pub fn host_port(&self) -> Option<&str> {
        self.published().ok().map(|s| s.host_port.as_str())
    }

    /// Connection descriptor published by the bootstrap
    pub fn connection_config(&self) -> Option<&ConnectionConfig> {
        self.published().ok().map(|s| &s.connection)
    }

    /// Open a fresh connection once the database answers a ping
    #[instrument(skip(self))]
    pub async fn open(&self) -> Result<PgConnection, PgTestError> {
        let connection = &self.published()?.connection;

        retry(&self.config.steady_state_backoff(), move || async move {
            let mut conn = connection.connect().await?;
            conn.ping().await?;
            Ok::<_, PgTestError>(conn)
        })
        .await
        .map_err(readiness_error)
    }

    /// Like [`Self::open`], then apply `migration` to the new connection
    #[instrument(skip_all)]
    pub async fn open_with_migration<M>(&self, migration: &M) -> Result<PgConnection, PgTestError>
    where
        M: Migration + ?Sized,
    {
        let mut conn = self.open().await?;
        migration
            .apply(&mut conn)
            .await
            .map_err(PgTestError::Migration)?;
        debug!("Migration applied");
        Ok(conn)
    }
}

fn readiness_error(err: RetryError<PgTestError>) -> PgTestError {
    match err {
        RetryError::TimedOut {
            attempts,
            elapsed,
            last_error,
        } => PgTestError::ReadinessTimeout {
            attempts,
            elapsed,
            last_error: last_error.to_string(),
        },
        RetryError::Permanent(e) => e,
    }
}

/// Releases the container; clones share state and purge at most once
#[derive(Debug, Clone)]
pub struct Teardown {
    inner: Arc<TeardownInner>,
}

#[derive(Debug)]
struct TeardownInner {
    container: Arc<dyn RunningContainer>,
    purged: AtomicBool,
    watchdog: OnceLock<AbortHandle>,
}

impl Teardown {
    fn new(container: Arc<dyn RunningContainer>) -> Self {
        Self {
            inner: Arc::new(TeardownInner {
                container,
                purged: AtomicBool::new(false),
                watchdog: OnceLock::new(),
            }),
        }
    }

    /// Id of the container this handle purges
    pub fn container_id(&self) -> &str {
        self.inner.container.id()
    }

    /// True once a purge has been claimed
    pub fn is_purged(&self) -> bool {
        self.inner.purged.load(Ordering::Acquire)
    }

    /// Purge the container
    ///
    /// Calls after a successful purge are no-ops. A failed purge can be retried.
    pub async fn run(&self) -> Result<(), PgTestError> {
        if self.inner.purged.swap(true, Ordering::AcqRel) {
            debug!(container_id = %self.container_id(), "Container already purged");
            return Ok(());
        }

        if let Err(e) = self.inner.container.purge().await {
            self.inner.purged.store(false, Ordering::Release);
            return Err(e);
        }

        if let Some(watchdog) = self.inner.watchdog.get() {
            watchdog.abort();
        }
        info!(container_id = %self.container_id(), "Test database container purged");
        Ok(())
    }

    /// In-process purge after `after`, backing up the timer inside the container
    ///
    /// The task lives on the runtime that called `start` and dies with it.
    fn expire_after(&self, after: Duration) {
        let teardown = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if teardown.is_purged() {
                return;
            }
            warn!(
                container_id = %teardown.container_id(),
                after_secs = after.as_secs(),
                "Container expired without teardown"
            );
            if let Err(e) = teardown.run().await {
                warn!(error = %e, "Failed to purge expired container");
            }
        });
        let _ = self.inner.watchdog.set(handle.abort_handle());
    }
}

impl PartialEq for Teardown {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Teardown {}
