//! Error types for the grid cache store.

use thiserror::Error;

/// Errors that can occur when reading or writing the grid cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure (I/O, constraint violation, malformed row).
    ///
    /// `context` names the composite key or query involved.
    #[error("Storage error ({context}): {source}")]
    Sqlite {
        /// Composite key or query the failure belongs to.
        context: String,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// I/O error preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store lock was poisoned (a thread panicked while holding the lock).
    #[error("Store lock was poisoned")]
    LockPoisoned,

    /// A value cannot be represented in the store.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A read query was malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Attach the composite key to SQLite failures.
pub(crate) trait SqlContext<T> {
    fn context<C: std::fmt::Display + ?Sized>(self, context: &C) -> Result<T, StoreError>;
}

impl<T> SqlContext<T> for Result<T, rusqlite::Error> {
    fn context<C: std::fmt::Display + ?Sized>(self, context: &C) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Sqlite {
            context: context.to_string(),
            source,
        })
    }
}
