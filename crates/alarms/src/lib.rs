//! `alarms` crate — tenant-scoped alarm persistence.
//!
//! Builds injection-safe statements for alarm lookups, filtered listings and
//! deletes, and runs them through a pluggable [`QueryExecutor`].  Connection
//! management and retries live in the executor, not here.

pub mod error;
pub mod executor;
pub mod mock;
pub mod models;
pub mod pool;
pub mod query;
pub mod repository;
pub mod statement;

pub use error::DbError;
pub use executor::{EffectTransaction, QueryExecutor, Record};
pub use models::{Alarm, AlarmFilters, AlarmMetricRow, AlarmRow, AlarmState, SubAlarmRow};
pub use pool::{ExecutorConfig, PgExecutor, SqliteExecutor};
pub use repository::AlarmsRepository;
pub use statement::{Dialect, Statement};
