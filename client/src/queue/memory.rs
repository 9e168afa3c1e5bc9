//! In-memory mutation queue over [`QueueArena`].

use super::MutationQueue;
use crate::{Result, TenantContext};
use async_trait::async_trait;
use tabsync_engine::{MutationQueueEntry, NewMutation, QueueArena, SequenceId, Table};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryQueue {
    arena: Mutex<QueueArena>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MutationQueue for MemoryQueue {
    async fn enqueue(&self, mutation: NewMutation) -> Result<SequenceId> {
        Ok(self.arena.lock().await.enqueue(mutation))
    }

    async fn dequeue_batch_after(
        &self,
        ctx: &TenantContext,
        after: SequenceId,
        limit: usize,
    ) -> Result<Vec<MutationQueueEntry>> {
        Ok(self
            .arena
            .lock()
            .await
            .dequeue_after(ctx.tenant_id(), after, limit))
    }

    async fn latest_for(&self, ctx: &TenantContext, table: Table, record_id: &str) -> Result<Option<MutationQueueEntry>> {
        Ok(self
            .arena
            .lock()
            .await
            .latest_for(ctx.tenant_id(), table, record_id)
            .cloned())
    }

    async fn ack(&self, sequence_id: SequenceId) -> Result<()> {
        self.arena.lock().await.ack(sequence_id);
        Ok(())
    }

    async fn mark_retry(&self, sequence_id: SequenceId) -> Result<()> {
        self.arena.lock().await.mark_retry(sequence_id);
        Ok(())
    }

    async fn prune_exhausted(&self, ctx: &TenantContext, max_retries: u32) -> Result<Vec<MutationQueueEntry>> {
        Ok(self
            .arena
            .lock()
            .await
            .prune_exhausted(ctx.tenant_id(), max_retries))
    }

    async fn len(&self, ctx: &TenantContext) -> Result<usize> {
        Ok(self.arena.lock().await.len(ctx.tenant_id()))
    }
}
