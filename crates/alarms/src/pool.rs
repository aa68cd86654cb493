//! sqlx-backed executors.
//!
//! Reads and transaction starts are retried on transient failures with
//! exponential back-off; everything else is surfaced as `DbError::Storage`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::sqlite::Sqlite;
use sqlx::{Column, PgPool, Row, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use crate::executor::{EffectTransaction, QueryExecutor, Record};
use crate::statement::{Dialect, Statement};
use crate::DbError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry tuning for executor calls.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a transient failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Create a new Postgres connection pool from the given `database_url`.
///
/// `max_connections` controls the pool ceiling.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    info!("Connecting to database (max_connections={})", max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Connection-level failures worth another attempt.
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating for very large retry counts.
fn backoff_delay(config: &ExecutorConfig, attempt: u32) -> Duration {
    config
        .retry_base_delay
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

async fn with_retry<T, F, Fut>(config: &ExecutorConfig, op: &str, mut call: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempts = 0u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempts < config.max_retries => {
                attempts += 1;
                let delay = backoff_delay(config, attempts);
                warn!(
                    "{} transient error (attempt {}/{}), retrying in {:?}: {}",
                    op, attempts, config.max_retries, delay, err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(DbError::Storage(err)),
        }
    }
}

/// Copy every column of a driver row into a [`Record`] as nullable text.
fn to_record<R>(row: &R) -> Result<Record, sqlx::Error>
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    Option<String>: for<'r> sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        record.push(column.name(), row.try_get::<Option<String>, _>(i)?);
    }
    Ok(record)
}

/// Implements [`QueryExecutor`] for one sqlx driver.  The drivers only differ
/// in pool type and placeholder dialect.
macro_rules! sqlx_executor {
    ($name:ident, $tx:ident, $pool:ty, $db:ty, $dialect:expr) => {
        /// Executor over a shared sqlx pool.
        #[derive(Debug, Clone)]
        pub struct $name {
            pool: $pool,
            config: ExecutorConfig,
        }

        impl $name {
            pub fn new(pool: $pool, config: ExecutorConfig) -> Self {
                Self { pool, config }
            }

            pub fn pool(&self) -> &$pool {
                &self.pool
            }
        }

        /// An open write transaction on the pool.
        pub struct $tx(Transaction<'static, $db>);

        #[async_trait]
        impl QueryExecutor for $name {
            type Tx = $tx;

            fn dialect(&self) -> Dialect {
                $dialect
            }

            async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, DbError> {
                debug!(args = statement.args.len(), "fetch: {}", statement.sql.trim());
                let rows = with_retry(&self.config, "fetch", || {
                    statement
                        .args
                        .iter()
                        .fold(sqlx::query::<$db>(&statement.sql), |q, arg| q.bind(arg.as_str()))
                        .fetch_all(&self.pool)
                })
                .await?;

                rows.iter()
                    .map(|row| to_record(row).map_err(DbError::from))
                    .collect()
            }

            async fn begin(&self) -> Result<Self::Tx, DbError> {
                let tx = with_retry(&self.config, "begin", || self.pool.begin()).await?;
                Ok($tx(tx))
            }
        }

        #[async_trait]
        impl EffectTransaction for $tx {
            async fn execute_for_effect(&mut self, statement: &Statement) -> Result<u64, DbError> {
                debug!(args = statement.args.len(), "execute: {}", statement.sql.trim());
                let result = statement
                    .args
                    .iter()
                    .fold(sqlx::query::<$db>(&statement.sql), |q, arg| q.bind(arg.as_str()))
                    .execute(&mut *self.0)
                    .await?;
                Ok(result.rows_affected())
            }

            async fn commit(self) -> Result<(), DbError> {
                self.0.commit().await?;
                Ok(())
            }
        }
    };
}

sqlx_executor!(PgExecutor, PgTransaction, PgPool, Postgres, Dialect::Postgres);
sqlx_executor!(SqliteExecutor, SqliteTransaction, SqlitePool, Sqlite, Dialect::Sqlite);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let config = ExecutorConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(400));

        // Past 32 attempts the multiplier would overflow a u32.
        let capped = Duration::from_millis(100).saturating_mul(u32::MAX);
        assert_eq!(backoff_delay(&config, 33), capped);
        assert_eq!(backoff_delay(&config, 200), capped);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(sqlx::Error::PoolTimedOut)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_config(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;

        assert!(matches!(result, Err(DbError::Storage(sqlx::Error::PoolTimedOut))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_config(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;

        assert!(matches!(result, Err(DbError::Storage(sqlx::Error::RowNotFound))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
