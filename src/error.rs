//! Error types for the nudge bot.

use crate::roster::types::MemberId;

/// Failure raised by the SQLite roster store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite driver error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error while preparing the database location.
    #[error("store I/O error: {0}")]
    Io(String),

    /// A previous holder of the connection lock panicked.
    #[error("store connection lock poisoned")]
    LockPoisoned,

    /// The database was written by a newer build.
    #[error("database schema version {found} is newer than supported {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },
}

/// Reconciliation of one observed event failed; the event's command effects
/// are skipped.
#[derive(Debug, thiserror::Error)]
#[error("failed to reconcile member {member}: {source}")]
pub struct ReconciliationError {
    pub member: MemberId,
    #[source]
    pub source: StoreError,
}

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Roster storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Roster reconciliation error.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_error_names_member() {
        let err = ReconciliationError {
            member: MemberId::new("42"),
            source: StoreError::LockPoisoned,
        };
        assert!(err.to_string().contains("42"));
    }
}
