//! In-memory local store.

use super::LocalStore;
use crate::{Result, TenantContext};
use async_trait::async_trait;
use dashmap::DashMap;
use tabsync_engine::{Record, RecordKey, SyncStatus, Table, TenantId};

type Slot = (Table, TenantId, String);

/// Local store kept in a concurrent map. Used by tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<Slot, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(ctx: &TenantContext, table: Table, key: &RecordKey) -> Slot {
        (table, ctx.tenant_id().to_string(), key.encode())
    }

    fn collect<F>(&self, ctx: &TenantContext, table: Table, keep: F) -> Vec<Record>
    where
        F: Fn(&Record) -> bool,
    {
        let mut records: Vec<Record> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == table && entry.key().1 == ctx.tenant_id())
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.key.encode());
        records
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_by_id(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<Option<Record>> {
        Ok(self
            .records
            .get(&Self::slot(ctx, table, key))
            .map(|r| r.value().clone()))
    }

    async fn upsert(&self, ctx: &TenantContext, record: &Record) -> Result<()> {
        ctx.check(record)?;
        self.records
            .insert(Self::slot(ctx, record.table, &record.key), record.clone());
        Ok(())
    }

    async fn delete_by_id(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<bool> {
        Ok(self.records.remove(&Self::slot(ctx, table, key)).is_some())
    }

    async fn set_status(
        &self,
        ctx: &TenantContext,
        table: Table,
        key: &RecordKey,
        status: SyncStatus,
    ) -> Result<bool> {
        Ok(match self.records.get_mut(&Self::slot(ctx, table, key)) {
            Some(mut record) => {
                record.sync_status = status;
                true
            }
            None => false,
        })
    }

    async fn replace_if_unchanged(&self, ctx: &TenantContext, expected: &Record, next: &Record) -> Result<bool> {
        ctx.check(next)?;
        Ok(match self.records.get_mut(&Self::slot(ctx, expected.table, &expected.key)) {
            Some(mut current) if *current == *expected => {
                *current = next.clone();
                true
            }
            _ => false,
        })
    }

    async fn children(
        &self,
        ctx: &TenantContext,
        table: Table,
        parent_field: &str,
        parent_id: &str,
    ) -> Result<Vec<Record>> {
        Ok(self.collect(ctx, table, |r| r.str_field(parent_field) == Some(parent_id)))
    }

    async fn list(&self, ctx: &TenantContext, table: Table) -> Result<Vec<Record>> {
        Ok(self.collect(ctx, table, |_| true))
    }
}
