//! `MockExecutor` — a test double for `QueryExecutor`.
//!
//! Useful in unit tests where the statements the repository builds matter
//! more than a real database.  Every statement is recorded; results come from
//! a script set up at construction time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::executor::{EffectTransaction, QueryExecutor, Record};
use crate::statement::{Dialect, Statement};
use crate::DbError;

/// What the executor does for one `fetch_all` call.
pub enum MockBehaviour {
    /// Return these rows.
    Rows(Vec<Record>),
    /// Fail with a storage error.
    FailStorage,
}

/// Stage of a write at which the executor fails with a storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    Begin,
    Execute,
    Commit,
}

/// A mock executor that records every statement it receives.
pub struct MockExecutor {
    dialect: Dialect,
    /// Consumed front to back; an exhausted script returns no rows.
    fetches: Mutex<VecDeque<MockBehaviour>>,
    /// Row count reported by every write.
    affected_rows: u64,
    /// Where writes fail, if at all.
    write_failure: Option<WriteFailure>,
    /// All statements seen (reads and writes, in call order).
    pub calls: Arc<Mutex<Vec<Statement>>>,
    /// Number of committed transactions.
    pub commits: Arc<Mutex<usize>>,
}

impl MockExecutor {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            fetches: Mutex::new(VecDeque::new()),
            affected_rows: 0,
            write_failure: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            commits: Arc::new(Mutex::new(0)),
        }
    }

    /// Queue a successful read.
    pub fn returning(self, rows: Vec<Record>) -> Self {
        self.fetches.lock().unwrap().push_back(MockBehaviour::Rows(rows));
        self
    }

    /// Queue a failing read.
    pub fn failing(self) -> Self {
        self.fetches.lock().unwrap().push_back(MockBehaviour::FailStorage);
        self
    }

    /// Set the affected-row count writes report.
    pub fn affecting(mut self, rows: u64) -> Self {
        self.affected_rows = rows;
        self
    }

    /// Make every write fail at `stage`.
    pub fn failing_write(mut self, stage: WriteFailure) -> Self {
        self.write_failure = Some(stage);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<Statement> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn commit_count(&self) -> usize {
        *self.commits.lock().unwrap()
    }
}

/// Transaction handed out by [`MockExecutor::begin`].
pub struct MockTransaction {
    affected_rows: u64,
    failure: Option<WriteFailure>,
    calls: Arc<Mutex<Vec<Statement>>>,
    commits: Arc<Mutex<usize>>,
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    type Tx = MockTransaction;

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, DbError> {
        self.calls.lock().unwrap().push(statement.clone());

        match self.fetches.lock().unwrap().pop_front() {
            Some(MockBehaviour::Rows(rows)) => Ok(rows),
            Some(MockBehaviour::FailStorage) => Err(DbError::Storage(sqlx::Error::PoolClosed)),
            None => Ok(Vec::new()),
        }
    }

    async fn begin(&self) -> Result<Self::Tx, DbError> {
        if self.write_failure == Some(WriteFailure::Begin) {
            return Err(DbError::Storage(sqlx::Error::PoolClosed));
        }
        Ok(MockTransaction {
            affected_rows: self.affected_rows,
            failure: self.write_failure,
            calls: Arc::clone(&self.calls),
            commits: Arc::clone(&self.commits),
        })
    }
}

#[async_trait]
impl EffectTransaction for MockTransaction {
    async fn execute_for_effect(&mut self, statement: &Statement) -> Result<u64, DbError> {
        self.calls.lock().unwrap().push(statement.clone());
        if self.failure == Some(WriteFailure::Execute) {
            return Err(DbError::Storage(sqlx::Error::PoolClosed));
        }
        Ok(self.affected_rows)
    }

    async fn commit(self) -> Result<(), DbError> {
        if self.failure == Some(WriteFailure::Commit) {
            return Err(DbError::Storage(sqlx::Error::PoolClosed));
        }
        *self.commits.lock().unwrap() += 1;
        Ok(())
    }
}
