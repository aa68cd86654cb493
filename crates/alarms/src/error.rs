//! Typed error type for the alarms crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A single-entity lookup or delete matched nothing for this tenant.
    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// Unrecovered failure from the underlying executor.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Filter input the caller should have rejected.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("column '{0}' missing from result row")]
    MissingColumn(String),

    #[error("column '{0}' is unexpectedly null")]
    UnexpectedNull(String),

    #[error("unknown alarm state: {0}")]
    InvalidState(String),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
