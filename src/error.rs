//! Error types for the reconciliation engine.

use rusqlite::ffi;
use thiserror::Error;

use crate::row::ChangeRow;

/// Failures reported by a [`Store`](crate::store::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Some other actor already
    /// applied an equivalent change.
    #[error("uniqueness violation: {0}")]
    UniqueViolation(String),

    /// Any other driver failure.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    pub fn is_collision(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let unique = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        e.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    )
        );
        if unique {
            StoreError::UniqueViolation(err.to_string())
        } else {
            StoreError::Sqlite(err)
        }
    }
}

/// A row that must halt the run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The row itself is invalid (missing field, source change, bad date).
    #[error("{message} in {row}")]
    Input { message: String, row: ChangeRow },

    /// The store failed while processing the row.
    #[error("{context} for row {row}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
        row: ChangeRow,
    },
}

impl ReconcileError {
    pub(crate) fn input(row: &ChangeRow, message: impl Into<String>) -> Self {
        ReconcileError::Input {
            message: message.into(),
            row: row.clone(),
        }
    }

    /// The row that produced this error.
    pub fn row(&self) -> &ChangeRow {
        match self {
            ReconcileError::Input { row, .. } | ReconcileError::Store { row, .. } => row,
        }
    }
}

/// Attach row context to store results.
pub(crate) trait RowContext<T> {
    fn for_row(self, row: &ChangeRow, context: &str) -> Result<T, ReconcileError>;
}

impl<T> RowContext<T> for Result<T, StoreError> {
    fn for_row(self, row: &ChangeRow, context: &str) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Store {
            context: context.to_string(),
            source,
            row: row.clone(),
        })
    }
}
