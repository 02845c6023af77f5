//! Record-count assertions for test code
//!
//! Each check runs `SELECT COUNT(*) FROM <table> WHERE <filter>` with the
//! parameters bound positionally (`$1`, `$2`, ...). Table and filter are
//! interpolated verbatim, so they must come from the test itself.
//!
//! A mismatch is not an error: it is logged at error level and reported as
//! `Ok(false)`, leaving the decision to fail to the calling test.
//!
//! ```rust,ignore
//! let mut tx = conn.begin().await?;
//! assert!(assert_record_exists(&mut *tx, "test", "id = $1", &[id.into()]).await?);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::Executor;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryScalar;
use tracing::{error, instrument, trace};
use uuid::Uuid;

use crate::error::PgTestError;

/// A positional query parameter
///
/// Each variant is bound with its own Postgres type, so the compared column
/// must match it or the filter must cast (`id = $1::uuid` for a text id).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Sent as a text-typed NULL
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Bound as `text`; comparing against `uuid` or numeric columns needs a cast
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Uuid> for SqlParam {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl SqlParam {
    fn bind<'q>(
        &self,
        query: QueryScalar<'q, Postgres, i64, PgArguments>,
    ) -> QueryScalar<'q, Postgres, i64, PgArguments> {
        match self {
            Self::Null => query.bind(None::<String>),
            Self::Bool(v) => query.bind(*v),
            Self::Int(v) => query.bind(*v),
            Self::Float(v) => query.bind(*v),
            Self::Text(v) => query.bind(v.clone()),
            Self::Uuid(v) => query.bind(*v),
            Self::Timestamp(v) => query.bind(*v),
        }
    }
}

fn count_query(table: &str, filter: &str) -> String {
    format!("SELECT COUNT(*) FROM {table} WHERE {filter}")
}

/// Outcome of a record-count query
#[derive(Debug, Clone, PartialEq)]
pub struct CountCheck {
    pub table: String,
    pub filter: String,
    pub params: Vec<SqlParam>,
    pub expected: i64,
    pub actual: i64,
}

impl CountCheck {
    pub const fn passed(&self) -> bool {
        self.expected == self.actual
    }
}

impl fmt::Display for CountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Expected record count is {}, but got {}",
            self.expected, self.actual
        )?;
        writeln!(f, "Table: {}", self.table)?;
        writeln!(f, "Filter: {}", self.filter)?;
        f.write_str("Params: [")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str("]")
    }
}

/// Count matching rows and compare against `expected`
pub async fn check_record_count<'c, E>(
    executor: E,
    expected: i64,
    table: &str,
    filter: &str,
    params: &[SqlParam],
) -> Result<CountCheck, PgTestError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = count_query(table, filter);
    let query = params
        .iter()
        .fold(sqlx::query_scalar::<_, i64>(&sql), |query, param| param.bind(query));

    let actual = query.fetch_one(executor).await?;
    trace!(table, filter, expected, actual, "Record count checked");

    Ok(CountCheck {
        table: table.to_string(),
        filter: filter.to_string(),
        params: params.to_vec(),
        expected,
        actual,
    })
}

/// Returns `Ok(false)` and logs the details when the count differs
#[instrument(skip(executor, params))]
pub async fn assert_record_count<'c, E>(
    executor: E,
    expected: i64,
    table: &str,
    filter: &str,
    params: &[SqlParam],
) -> Result<bool, PgTestError>
where
    E: Executor<'c, Database = Postgres>,
{
    let check = check_record_count(executor, expected, table, filter, params).await?;
    if !check.passed() {
        error!("{check}");
    }
    Ok(check.passed())
}

/// Exactly one matching row
pub async fn assert_record_exists<'c, E>(
    executor: E,
    table: &str,
    filter: &str,
    params: &[SqlParam],
) -> Result<bool, PgTestError>
where
    E: Executor<'c, Database = Postgres>,
{
    assert_record_count(executor, 1, table, filter, params).await
}

/// No matching rows
pub async fn assert_record_not_exists<'c, E>(
    executor: E,
    table: &str,
    filter: &str,
    params: &[SqlParam],
) -> Result<bool, PgTestError>
where
    E: Executor<'c, Database = Postgres>,
{
    assert_record_count(executor, 0, table, filter, params).await
}
