//! Error types for the tabsync engine.

use crate::{Table, TenantId};
use thiserror::Error;

/// All possible errors from the tabsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Registry errors
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("no adapter registered for table: {0}")]
    AdapterNotFound(Table),

    // Payload errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Key errors
    #[error("invalid composite key: {0:?}")]
    InvalidCompositeKey(String),

    #[error("key does not fit table {table}: {key}")]
    KeyMismatch { table: Table, key: String },

    #[error("tenant mismatch: expected {expected}, got {actual}")]
    TenantMismatch { expected: TenantId, actual: TenantId },

    // Enum parsing
    #[error("invalid sync status: {0}")]
    InvalidSyncStatus(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
