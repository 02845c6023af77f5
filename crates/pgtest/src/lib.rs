//! Disposable PostgreSQL databases for integration tests
//!
//! [`TestDatabase`] starts a throwaway PostgreSQL container once, waits until
//! it accepts connections and hands out fresh connections, optionally after
//! running a [`Migration`]. The [`assertions`] module checks row counts with
//! descriptive failure messages. [`Teardown`] removes the container.

pub mod assertions;
pub mod config;
pub mod container;
pub mod environment;
pub mod error;
pub mod migration;
pub mod probe;
pub mod retry;
pub mod telemetry;

pub use assertions::{
    CountCheck, SqlParam, assert_record_count, assert_record_exists, assert_record_not_exists,
    check_record_count,
};
pub use config::{ConnectionConfig, PgTestConfig};
pub use container::{ContainerRuntime, ContainerSpec, DockerRuntime, RunningContainer};
pub use environment::{Teardown, TestDatabase};
pub use error::{BoxError, PgTestError};
pub use migration::{FnMigration, Migration, SqlMigration, migration_fn};
pub use probe::{PingProbe, ReadinessProbe};
pub use retry::{BackoffConfig, RetryError, RetryResult, Retryable, retry, with_retry};
pub use telemetry::{TracingConfig, init_test_tracing};
