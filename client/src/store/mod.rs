//! Local record store.
//!
//! The store holds the device's copy of every synced table. Each call is
//! atomic for a single record; nothing here spans several records, because
//! the push synchronizer and the realtime reconciler write concurrently.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{Result, TenantContext};
use async_trait::async_trait;
use tabsync_engine::{Record, RecordKey, SyncStatus, Table};

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_by_id(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<Option<Record>>;

    /// Insert or replace a record. Fails on a record of another tenant.
    async fn upsert(&self, ctx: &TenantContext, record: &Record) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete_by_id(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<bool>;

    /// Set a record's sync status without touching its fields or timestamp.
    async fn set_status(
        &self,
        ctx: &TenantContext,
        table: Table,
        key: &RecordKey,
        status: SyncStatus,
    ) -> Result<bool>;

    async fn mark_synced(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<bool> {
        self.set_status(ctx, table, key, SyncStatus::Synced).await
    }

    /// Overwrite `expected` with `next` only if the stored record still
    /// equals `expected`. Both must address the same record.
    ///
    /// Returns whether the write happened.
    async fn replace_if_unchanged(&self, ctx: &TenantContext, expected: &Record, next: &Record) -> Result<bool>;

    /// Records of `table` whose local field `parent_field` equals `parent_id`.
    async fn children(
        &self,
        ctx: &TenantContext,
        table: Table,
        parent_field: &str,
        parent_id: &str,
    ) -> Result<Vec<Record>>;

    /// Every record of a table, ordered by key.
    async fn list(&self, ctx: &TenantContext, table: Table) -> Result<Vec<Record>>;
}
