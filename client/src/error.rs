use crate::config::ConfigError;
use crate::remote::RemoteError;
use thiserror::Error;

/// Errors raised by the sync runtime.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("engine error: {0}")]
    Engine(#[from] tabsync_engine::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Failures of the local store abort a cycle instead of being retried
    /// entry by entry.
    pub fn is_local(&self) -> bool {
        matches!(self, SyncError::Database(_) | SyncError::Migration(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err: SyncError = tabsync_engine::Error::UnknownTable("menus".into()).into();
        assert_eq!(err.to_string(), "engine error: unknown table: menus");
        assert!(!err.is_local());

        let err: SyncError = RemoteError::Closed.into();
        assert_eq!(err.to_string(), "remote error: change feed closed");
        assert!(!err.is_local());
    }
}
