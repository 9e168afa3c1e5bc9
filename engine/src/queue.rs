//! Mutation queue entries and the in-memory queue arena.
//!
//! The queue is append-only and ordered by a monotonic sequence id. A batch
//! dequeue is a read-only range scan; the caller acks (deletes) or retries
//! (increments the counter) each entry after attempting its remote call.

use crate::{Operation, Record, RecordKey, Result, SequenceId, Table, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Retry budget after which an entry is pruned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A local write waiting to be enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMutation {
    pub tenant_id: TenantId,
    pub table: Table,
    /// Encoded [`RecordKey`]
    pub record_id: String,
    pub operation: Operation,
    /// Snapshot of the record at write time
    pub payload: Value,
    pub created_at: Timestamp,
}

impl NewMutation {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        table: Table,
        key: &RecordKey,
        operation: Operation,
        payload: Value,
        created_at: Timestamp,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            table,
            record_id: key.encode(),
            operation,
            payload,
            created_at,
        }
    }

    /// Mutation describing a write of `record`.
    pub fn for_record(record: &Record, operation: Operation, created_at: Timestamp) -> Self {
        Self::new(
            record.tenant_id.clone(),
            record.table,
            &record.key,
            operation,
            record.payload(),
            created_at,
        )
    }
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationQueueEntry {
    pub sequence_id: SequenceId,
    pub tenant_id: TenantId,
    pub table: Table,
    pub record_id: String,
    pub operation: Operation,
    pub payload: Value,
    pub created_at: Timestamp,
    pub retry_count: u32,
}

impl MutationQueueEntry {
    /// Build the stored entry for a mutation.
    pub fn from_new(sequence_id: SequenceId, mutation: NewMutation) -> Self {
        Self {
            sequence_id,
            tenant_id: mutation.tenant_id,
            table: mutation.table,
            record_id: mutation.record_id,
            operation: mutation.operation,
            payload: mutation.payload,
            created_at: mutation.created_at,
            retry_count: 0,
        }
    }

    /// Decode the addressed record key.
    pub fn key(&self) -> Result<RecordKey> {
        RecordKey::decode(self.table, &self.record_id)
    }

    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

/// Append-only arena of queue entries keyed by sequence id.
#[derive(Debug, Clone, Default)]
pub struct QueueArena {
    last_sequence: SequenceId,
    entries: BTreeMap<SequenceId, MutationQueueEntry>,
}

impl QueueArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation and return its sequence id.
    pub fn enqueue(&mut self, mutation: NewMutation) -> SequenceId {
        self.last_sequence += 1;
        let sequence_id = self.last_sequence;
        self.entries
            .insert(sequence_id, MutationQueueEntry::from_new(sequence_id, mutation));
        sequence_id
    }

    /// Oldest `limit` entries of a tenant, in sequence order.
    pub fn dequeue_batch(&self, tenant_id: &str, limit: usize) -> Vec<MutationQueueEntry> {
        self.dequeue_after(tenant_id, 0, limit)
    }

    /// Oldest `limit` entries of a tenant with a sequence id above `after`.
    pub fn dequeue_after(&self, tenant_id: &str, after: SequenceId, limit: usize) -> Vec<MutationQueueEntry> {
        self.entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, e)| e)
            .filter(|e| e.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Newest queued entry addressing one record.
    pub fn latest_for(&self, tenant_id: &str, table: Table, record_id: &str) -> Option<&MutationQueueEntry> {
        self.entries
            .values()
            .rev()
            .find(|e| e.tenant_id == tenant_id && e.table == table && e.record_id == record_id)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn ack(&mut self, sequence_id: SequenceId) -> bool {
        self.entries.remove(&sequence_id).is_some()
    }

    /// Increment an entry's retry counter, returning the new count.
    pub fn mark_retry(&mut self, sequence_id: SequenceId) -> Option<u32> {
        self.entries.get_mut(&sequence_id).map(|entry| {
            entry.retry_count += 1;
            entry.retry_count
        })
    }

    /// Remove a tenant's entries whose retry count reached `max_retries`.
    pub fn prune_exhausted(&mut self, tenant_id: &str, max_retries: u32) -> Vec<MutationQueueEntry> {
        let exhausted: Vec<SequenceId> = self
            .entries
            .values()
            .filter(|e| e.tenant_id == tenant_id && e.is_exhausted(max_retries))
            .map(|e| e.sequence_id)
            .collect();

        exhausted
            .into_iter()
            .filter_map(|seq| self.entries.remove(&seq))
            .collect()
    }

    pub fn get(&self, sequence_id: SequenceId) -> Option<&MutationQueueEntry> {
        self.entries.get(&sequence_id)
    }

    /// Number of entries queued for a tenant.
    pub fn len(&self, tenant_id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
