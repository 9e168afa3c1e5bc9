//! # tabsync client
//!
//! Device-side runtime of the tabsync offline-first sync engine.
//!
//! Local writes land in a [`LocalStore`] and a durable [`MutationQueue`]
//! through the [`ChangeTracker`]. The [`PushSynchronizer`] drains the queue
//! into a [`RemoteStore`], the [`RealtimeReconciler`] applies remote changes
//! from a [`ChangeFeed`], and the [`SyncScheduler`] decides when pushes
//! run. [`SyncRuntime`] wires them together for one tenant session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tabsync_client::{
//!     MemoryQueue, MemoryRemote, MemoryStore, SyncRuntime, SyncServices, SyncSettings,
//!     TenantContext,
//! };
//! use tabsync_engine::{AdapterRegistry, Record, RecordKey, Table};
//!
//! # async fn demo() -> tabsync_client::Result<()> {
//! let remote = Arc::new(MemoryRemote::new());
//! let runtime = SyncRuntime::new(
//!     SyncServices {
//!         store: Arc::new(MemoryStore::new()),
//!         queue: Arc::new(MemoryQueue::new()),
//!         remote: remote.clone(),
//!         feed: remote.clone(),
//!         connectivity: remote,
//!         registry: Arc::new(AdapterRegistry::standard()),
//!     },
//!     &SyncSettings::default(),
//! );
//!
//! let ctx = TenantContext::new("resto-1");
//! runtime.start_session(ctx.clone()).await;
//!
//! let category = Record::new(
//!     Table::Categories,
//!     RecordKey::id("cat-1"),
//!     "resto-1",
//!     0,
//!     json!({"name": "Drinks"}),
//! );
//! runtime.tracker().insert(&ctx, category).await?;
//! runtime.trigger_sync();
//!
//! runtime.end_session().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod push;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod tracker;

pub use config::{Config, ConfigError, SyncSettings};
pub use context::TenantContext;
pub use error::{Result, SyncError};
pub use push::{PushReport, PushSynchronizer};
pub use queue::{MemoryQueue, MutationQueue, SqliteQueue};
pub use realtime::{ApplyOutcome, RealtimeReconciler};
pub use remote::{
    ChangeFeed, Connectivity, ConnectivityFlag, FeedStream, HttpConnectivity, HttpRemote,
    MemoryRemote, RemoteCall, RemoteError, RemoteOp, RemoteStore, WsChangeFeed,
};
pub use runtime::{SyncRuntime, SyncServices};
pub use scheduler::{backoff_delay, JobState, JobStatus, SyncScheduler, Trigger};
pub use store::{LocalStore, MemoryStore, SqliteStore};
pub use tracker::ChangeTracker;

use tabsync_engine::Timestamp;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
