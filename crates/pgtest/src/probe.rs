//! Liveness probe used by the readiness gate.

use std::fmt;

use async_trait::async_trait;
use sqlx::Connection;
use tracing::trace;

use crate::config::ConnectionConfig;
use crate::error::PgTestError;

/// Check whether the database behind a connection descriptor answers
#[async_trait]
pub trait ReadinessProbe: Send + Sync + fmt::Debug {
    async fn probe(&self, connection: &ConnectionConfig) -> Result<(), PgTestError>;
}

/// Opens a connection, pings, and closes it again
#[derive(Debug, Default, Clone, Copy)]
pub struct PingProbe;

#[async_trait]
impl ReadinessProbe for PingProbe {
    async fn probe(&self, connection: &ConnectionConfig) -> Result<(), PgTestError> {
        let mut conn = connection.connect().await?;
        conn.ping().await?;
        conn.close().await?;
        trace!(host_port = %connection.host_port(), "Ping succeeded");
        Ok(())
    }
}
