//! Repository-side write path.
//!
//! UI glue never talks to the queue directly: it hands every local write to
//! a [`ChangeTracker`], which applies it to the local store and records the
//! mutation for the next push.

use crate::queue::MutationQueue;
use crate::store::LocalStore;
use crate::{now_millis, Result, TenantContext};
use std::sync::Arc;
use tabsync_engine::{NewMutation, Operation, Record, SequenceId, Timestamp};
use tracing::debug;

#[derive(Clone)]
pub struct ChangeTracker {
    store: Arc<dyn LocalStore>,
    queue: Arc<dyn MutationQueue>,
}

impl ChangeTracker {
    pub fn new(store: Arc<dyn LocalStore>, queue: Arc<dyn MutationQueue>) -> Self {
        Self { store, queue }
    }

    /// Apply a local write and enqueue it, stamped with the current time.
    pub async fn record(&self, ctx: &TenantContext, record: Record, operation: Operation) -> Result<SequenceId> {
        self.record_at(ctx, record, operation, now_millis()).await
    }

    /// Apply a local write and enqueue it, stamped with `timestamp`.
    ///
    /// Inserts and updates are stored `PENDING`; deletes remove the local
    /// record. The queue entry carries a snapshot of the record either way.
    pub async fn record_at(
        &self,
        ctx: &TenantContext,
        mut record: Record,
        operation: Operation,
        timestamp: Timestamp,
    ) -> Result<SequenceId> {
        ctx.check(&record)?;
        record.touch(timestamp);

        if operation.is_upsert() {
            self.store.upsert(ctx, &record).await?;
        } else {
            self.store.delete_by_id(ctx, record.table, &record.key).await?;
        }

        let sequence_id = self
            .queue
            .enqueue(NewMutation::for_record(&record, operation, timestamp))
            .await?;
        debug!(
            seq = sequence_id,
            table = %record.table,
            key = %record.key,
            op = %operation,
            "local write queued"
        );
        Ok(sequence_id)
    }

    pub async fn insert(&self, ctx: &TenantContext, record: Record) -> Result<SequenceId> {
        self.record(ctx, record, Operation::Insert).await
    }

    pub async fn update(&self, ctx: &TenantContext, record: Record) -> Result<SequenceId> {
        self.record(ctx, record, Operation::Update).await
    }

    pub async fn delete(&self, ctx: &TenantContext, record: Record) -> Result<SequenceId> {
        self.record(ctx, record, Operation::Delete).await
    }
}
