//! Durable mutation queue.
//!
//! Every queue is tenant-scoped: entries carry their tenant and batches,
//! pruning and counts only ever see the session tenant's entries.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use crate::{Result, TenantContext};
use async_trait::async_trait;
use tabsync_engine::{MutationQueueEntry, NewMutation, SequenceId, Table};

#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Append a mutation. A single insert; never waits on remote work.
    async fn enqueue(&self, mutation: NewMutation) -> Result<SequenceId>;

    /// Oldest `limit` entries, in sequence order. Does not modify the queue.
    async fn dequeue_batch(&self, ctx: &TenantContext, limit: usize) -> Result<Vec<MutationQueueEntry>> {
        self.dequeue_batch_after(ctx, 0, limit).await
    }

    /// Oldest `limit` entries with a sequence id above `after`.
    async fn dequeue_batch_after(
        &self,
        ctx: &TenantContext,
        after: SequenceId,
        limit: usize,
    ) -> Result<Vec<MutationQueueEntry>>;

    /// Newest entry queued for one record, if any.
    async fn latest_for(&self, ctx: &TenantContext, table: Table, record_id: &str) -> Result<Option<MutationQueueEntry>>;

    /// Delete an entry after a successful push.
    async fn ack(&self, sequence_id: SequenceId) -> Result<()>;

    /// Count a failed push attempt.
    async fn mark_retry(&self, sequence_id: SequenceId) -> Result<()>;

    /// Delete and return entries whose retry count reached `max_retries`.
    async fn prune_exhausted(&self, ctx: &TenantContext, max_retries: u32) -> Result<Vec<MutationQueueEntry>>;

    async fn len(&self, ctx: &TenantContext) -> Result<usize>;

    async fn is_empty(&self, ctx: &TenantContext) -> Result<bool> {
        Ok(self.len(ctx).await? == 0)
    }
}
