//! The `QueryExecutor` trait — the storage capability the repository is
//! built on.
//!
//! Connection handling, retries and transient-error classification all live
//! behind this trait.  The repository only builds statements and interprets
//! the results.

use async_trait::async_trait;

use crate::statement::{Dialect, Statement};
use crate::DbError;

/// One result row: column names in select order, each with a nullable
/// text value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    columns: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append, mostly for fixtures.
    pub fn with(mut self, column: impl Into<String>, value: Option<&str>) -> Self {
        self.push(column, value.map(str::to_owned));
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: Option<String>) {
        self.columns.push((column.into(), value));
    }

    /// Value of `column`, which may be SQL NULL.
    pub fn get(&self, column: &str) -> Result<Option<&str>, DbError> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_deref())
            .ok_or_else(|| DbError::MissingColumn(column.to_owned()))
    }

    /// Value of a column that must not be NULL.
    pub fn required(&self, column: &str) -> Result<&str, DbError> {
        self.get(column)?
            .ok_or_else(|| DbError::UnexpectedNull(column.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Runs statements against storage.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    type Tx: EffectTransaction;

    /// Placeholder and function flavour statements must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Run a read statement and return every row in order.
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, DbError>;

    /// Open a transaction for a write.
    async fn begin(&self) -> Result<Self::Tx, DbError>;
}

/// A write in progress.  Dropping it without [`commit`](Self::commit) rolls
/// the write back.
#[async_trait]
pub trait EffectTransaction: Send {
    /// Run a write statement; returns the affected-row count.
    async fn execute_for_effect(&mut self, statement: &Statement) -> Result<u64, DbError>;

    async fn commit(self) -> Result<(), DbError>;
}
