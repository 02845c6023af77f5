//! Schema setup applied right after a connection is confirmed ready.
//!
//! Either hand over plain SQL:
//!
//! ```rust,ignore
//! let migration = SqlMigration::new(["CREATE TABLE test (id uuid PRIMARY KEY)"]);
//! let conn = db.open_with_migration(&migration).await?;
//! ```
//!
//! or any async function of the connection:
//!
//! ```rust,ignore
//! let migration = migration_fn(|conn| {
//!     Box::pin(async move {
//!         sqlx::query("CREATE TABLE test (id uuid PRIMARY KEY)").execute(conn).await?;
//!         Ok::<_, sqlx::Error>(())
//!     })
//! });
//! ```

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::PgConnection;
use tracing::debug;

use crate::error::BoxError;

/// Caller-supplied schema setup
#[async_trait]
pub trait Migration: Send + Sync {
    async fn apply(&self, conn: &mut PgConnection) -> Result<(), BoxError>;
}

/// Executes SQL statements in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlMigration {
    statements: Vec<String>,
}

impl SqlMigration {
    pub fn new<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

#[async_trait]
impl Migration for SqlMigration {
    async fn apply(&self, conn: &mut PgConnection) -> Result<(), BoxError> {
        for statement in &self.statements {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        debug!(statements = self.statements.len(), "SQL migration applied");
        Ok(())
    }
}

/// Migration backed by a closure; build it with [`migration_fn`]
pub struct FnMigration<F> {
    f: F,
}

impl<F> fmt::Debug for FnMigration<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`Migration`]
///
/// The closure receives the connection and returns a boxed future.
pub fn migration_fn<F, E>(f: F) -> FnMigration<F>
where
    F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<(), E>> + Send + Sync,
    E: Into<BoxError> + 'static,
{
    FnMigration { f }
}

#[async_trait]
impl<F, E> Migration for FnMigration<F>
where
    F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<(), E>> + Send + Sync,
    E: Into<BoxError> + 'static,
{
    async fn apply(&self, conn: &mut PgConnection) -> Result<(), BoxError> {
        (self.f)(conn).await.map_err(Into::into)
    }
}
