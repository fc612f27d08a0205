//! Store error taxonomy.
//!
//! # Design Decisions
//! - Uniqueness violations (`Conflict`) are expected under concurrent claims
//!   and are never retried; the first writer wins
//! - Lock/serialization failures (`Busy`) are transient and safe to retry
//! - Everything else is a terminal backend failure

use thiserror::Error;

/// Errors surfaced by a [`MappingStore`](crate::store::MappingStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Expected during
    /// concurrent claims: the value already belongs to another server.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    /// The storage engine reported a transient lock or serialization
    /// failure. Safe to retry.
    #[error("store busy: {0}")]
    Busy(String),

    /// No server row exists for the given address.
    #[error("no server registered at {0}")]
    NoSuchServer(String),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for failures worth retrying with a short delay.
    /// Conflicts are explicitly not transient: the value is already owned.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(inner, _) => match inner.code {
                ErrorCode::ConstraintViolation => StoreError::Conflict(err.to_string()),
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::Busy(err.to_string())
                }
                _ => StoreError::Backend(err.to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_transient_conflict_is_not() {
        assert!(StoreError::Busy("locked".into()).is_transient());
        assert!(!StoreError::Conflict("dup".into()).is_transient());
        assert!(!StoreError::Backend("io".into()).is_transient());
    }
}
