//! Container runtime port and its Docker adapter.
//!
//! The bootstrap only talks to [`ContainerRuntime`]; [`DockerRuntime`] is the
//! production implementation on top of testcontainers, with bollard used to
//! ping the daemon before anything is created.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use testcontainers::{ContainerAsync, ImageExt, core::ExecCommand, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PgTestConfig;
use crate::error::PgTestError;

/// Port PostgreSQL listens on inside the container
pub const POSTGRES_PORT: u16 = 5432;

/// What to run: image, tag and the credentials passed as POSTGRES_* variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub tag: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ContainerSpec {
    pub fn from_config(config: &PgTestConfig) -> Self {
        Self {
            image: config.image.clone(),
            tag: config.tag.clone(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

/// A backend able to create database containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync + fmt::Debug {
    /// Check the backend is reachable; failures are not retried
    async fn ping(&self) -> Result<(), PgTestError>;

    /// Create and start a container
    async fn run(&self, spec: &ContainerSpec) -> Result<Arc<dyn RunningContainer>, PgTestError>;
}

/// A started container
#[async_trait]
pub trait RunningContainer: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Host-visible `host:port` mapped to `container_port`
    async fn host_port(&self, container_port: u16) -> Result<String, PgTestError>;

    /// Start a timer inside the container that stops it after `after`
    ///
    /// The timer runs in the container, so it fires even if this process
    /// exits without calling [`Self::purge`].
    async fn arm_expiry(&self, after: Duration) -> Result<(), PgTestError>;

    /// Stop and remove the container
    async fn purge(&self) -> Result<(), PgTestError>;
}

/// Docker through testcontainers
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerRuntime;

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), PgTestError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| PgTestError::BackendUnavailable(format!("could not connect to Docker: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| PgTestError::BackendUnavailable(format!("Docker did not answer ping: {e}")))?;
        debug!("Docker daemon reachable");
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<Arc<dyn RunningContainer>, PgTestError> {
        info!(
            image = %spec.image,
            tag = %spec.tag,
            database = %spec.database,
            "Starting PostgreSQL container"
        );

        // Sets POSTGRES_DB/USER/PASSWORD. The container is removed on drop
        // and never restarted. No listen-address override: the image already
        // listens on all interfaces.
        let container = Postgres::default()
            .with_db_name(&spec.database)
            .with_user(&spec.user)
            .with_password(&spec.password)
            .with_name(&spec.image)
            .with_tag(&spec.tag)
            .start()
            .await
            .map_err(|e| PgTestError::ContainerSetup(e.to_string()))?;

        let id = container.id().to_string();
        debug!(container_id = %id, "PostgreSQL container started");

        Ok(Arc::new(DockerContainer {
            id,
            container: Mutex::new(Some(container)),
        }))
    }
}

/// Running container owned by [`DockerRuntime`]
#[derive(Debug)]
pub struct DockerContainer {
    id: String,
    container: Mutex<Option<ContainerAsync<Postgres>>>,
}

#[async_trait]
impl RunningContainer for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn host_port(&self, container_port: u16) -> Result<String, PgTestError> {
        let guard = self.container.lock().await;
        let container = guard
            .as_ref()
            .ok_or_else(|| PgTestError::ContainerSetup(format!("container {} already purged", self.id)))?;

        let host = container
            .get_host()
            .await
            .map_err(|e| PgTestError::ContainerSetup(e.to_string()))?;
        let port = container
            .get_host_port_ipv4(container_port)
            .await
            .map_err(|e| PgTestError::ContainerSetup(e.to_string()))?;

        Ok(format!("{host}:{port}"))
    }

    async fn arm_expiry(&self, after: Duration) -> Result<(), PgTestError> {
        let guard = self.container.lock().await;
        let container = guard
            .as_ref()
            .ok_or_else(|| PgTestError::ContainerSetup(format!("container {} already purged", self.id)))?;

        // PID 1 ignores SIGKILL from inside its own namespace; SIGQUIT makes
        // postgres shut down immediately, which stops the container.
        let script = format!(
            "(sleep {} && kill -s QUIT 1) >/dev/null 2>&1 &",
            after.as_secs()
        );
        container
            .exec(ExecCommand::new(["sh", "-c", script.as_str()]))
            .await
            .map_err(|e| PgTestError::ContainerSetup(format!("could not arm expiry on {}: {e}", self.id)))?;

        debug!(container_id = %self.id, after_secs = after.as_secs(), "Container expiry armed");
        Ok(())
    }

    async fn purge(&self) -> Result<(), PgTestError> {
        let Some(container) = self.container.lock().await.take() else {
            return Ok(());
        };
        container
            .rm()
            .await
            .map_err(|e| PgTestError::ContainerSetup(format!("could not purge {}: {e}", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_copies_config() {
        let config = PgTestConfig {
            tag: "16-alpine".to_string(),
            database: "orders".to_string(),
            ..Default::default()
        };
        let spec = ContainerSpec::from_config(&config);
        assert_eq!(spec.image, "postgres");
        assert_eq!(spec.tag, "16-alpine");
        assert_eq!(spec.database, "orders");
    }
}
