//! Interfaces to the shared backend.
//!
//! [`RemoteStore`] is the row API the push synchronizer writes through,
//! [`ChangeFeed`] delivers remote-originated changes and [`Connectivity`]
//! gates both. Every call takes the session's [`TenantContext`].

mod connectivity;
mod http;
mod memory;
mod ws;

pub use connectivity::{ConnectivityFlag, HttpConnectivity};
pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall, RemoteOp};
pub use ws::WsChangeFeed;

use crate::TenantContext;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tabsync_engine::{ChangeEvent, RecordKey, Table, TableFilter};
use thiserror::Error;

/// Failures talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable message: {0}")]
    Decode(String),

    #[error("subscription rejected: {0}")]
    Rejected(String),

    #[error("change feed closed")]
    Closed,
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RemoteError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RemoteError::Closed,
            other => RemoteError::Network(other.to_string()),
        }
    }
}

/// Stream of change events. A `Decode` item is a single bad message; any
/// other error, or the end of the stream, means the subscription is gone.
pub type FeedStream = BoxStream<'static, Result<ChangeEvent, RemoteError>>;

/// Row API of the backend, one table at a time.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or update wire rows.
    async fn upsert(&self, ctx: &TenantContext, table: Table, rows: Vec<Value>) -> Result<(), RemoteError>;

    /// Delete one row by primary key.
    async fn delete(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<(), RemoteError>;

    /// Delete every row with `column = value`.
    async fn delete_where(
        &self,
        ctx: &TenantContext,
        table: Table,
        column: &str,
        value: &str,
    ) -> Result<(), RemoteError>;

    /// Rows with `column = value`.
    async fn select_where(
        &self,
        ctx: &TenantContext,
        table: Table,
        column: &str,
        value: &str,
    ) -> Result<Vec<Value>, RemoteError>;
}

/// Realtime feed of remote row changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription; only changes matching one of `filters` arrive.
    async fn subscribe(&self, ctx: &TenantContext, filters: Vec<TableFilter>) -> Result<FeedStream, RemoteError>;
}

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}
