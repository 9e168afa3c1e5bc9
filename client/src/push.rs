//! Push synchronizer.
//!
//! One cycle drains the mutation queue into the remote store, a page of
//! `batch_size` entries at a time:
//!
//! 1. **Gate**: offline means no cycle at all, not a failed one
//! 2. **Prune**: entries out of retries are dropped and their record is
//!    escalated to `FAILED`
//! 3. **Push**: each entry is pushed in sequence order; success acks it and
//!    marks the record synced, failure counts a retry and moves on
//!
//! A record edited locally while its push was in flight stays `PENDING`;
//! the edit has its own queue entry and goes out after this one.
//!
//! Aggregates push their children alongside the parent: goods receivings
//! replace their whole item set, transactions only send items on insert.

use crate::config::SyncSettings;
use crate::queue::MutationQueue;
use crate::remote::{Connectivity, RemoteStore};
use crate::store::LocalStore;
use crate::{Result, SyncError, TenantContext};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tabsync_engine::{
    AdapterRegistry, ChildRelation, MutationQueueEntry, Operation, Record, RecordKey, SyncStatus,
    Table, SYNCED_QTY_FIELD,
};
use tracing::{debug, info, warn};

/// Attempts at moving an inventory base level under concurrent edits.
const BASE_ADVANCE_ATTEMPTS: usize = 3;

/// Outcome counts of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub pushed: usize,
    pub failed: usize,
    pub pruned: usize,
}

impl PushReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

pub struct PushSynchronizer {
    store: Arc<dyn LocalStore>,
    queue: Arc<dyn MutationQueue>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn Connectivity>,
    registry: Arc<AdapterRegistry>,
    batch_size: usize,
    max_retries: u32,
}

impl PushSynchronizer {
    pub fn new(
        store: Arc<dyn LocalStore>,
        queue: Arc<dyn MutationQueue>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        registry: Arc<AdapterRegistry>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            connectivity,
            registry,
            batch_size: settings.batch_size,
            max_retries: settings.max_retries,
        }
    }

    /// Run one push cycle for the session tenant.
    ///
    /// Remote failures are absorbed per entry and show up in the report;
    /// only local store failures are returned as errors.
    pub async fn run_cycle(&self, ctx: &TenantContext) -> Result<PushReport> {
        if !self.connectivity.is_online().await {
            debug!(tenant = %ctx.tenant_id(), "offline, skipping push cycle");
            return Ok(PushReport::default());
        }

        let mut report = PushReport {
            pruned: self.prune(ctx).await?,
            ..PushReport::default()
        };

        // Failed entries stay queued, so paging continues after the last
        // sequence seen instead of restarting from the head.
        let mut cursor = 0;
        loop {
            let page = self
                .queue
                .dequeue_batch_after(ctx, cursor, self.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.sequence_id;

            for entry in &page {
                self.push_one(ctx, entry, &mut report).await?;
            }
            if page.len() < self.batch_size {
                break;
            }
        }

        // Entries that just ran out of retries go now rather than lingering
        // until the next cycle.
        report.pruned += self.prune(ctx).await?;

        if report.pushed + report.failed + report.pruned > 0 {
            info!(
                tenant = %ctx.tenant_id(),
                pushed = report.pushed,
                failed = report.failed,
                pruned = report.pruned,
                "push cycle finished"
            );
        }
        Ok(report)
    }

    async fn push_one(&self, ctx: &TenantContext, entry: &MutationQueueEntry, report: &mut PushReport) -> Result<()> {
        match self.push_entry(ctx, entry).await {
            Ok(()) => {
                self.queue.ack(entry.sequence_id).await?;
                report.pushed += 1;
            }
            Err(e) if e.is_local() => return Err(e),
            Err(e) => {
                warn!(
                    seq = entry.sequence_id,
                    table = %entry.table,
                    record = %entry.record_id,
                    retry = entry.retry_count + 1,
                    error = %e,
                    "push failed"
                );
                self.queue.mark_retry(entry.sequence_id).await?;
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn prune(&self, ctx: &TenantContext) -> Result<usize> {
        let pruned = self.queue.prune_exhausted(ctx, self.max_retries).await?;
        for entry in &pruned {
            warn!(
                seq = entry.sequence_id,
                table = %entry.table,
                record = %entry.record_id,
                op = %entry.operation,
                retries = entry.retry_count,
                "giving up on queued mutation"
            );
            if !entry.operation.is_upsert() {
                continue;
            }
            match entry.key() {
                Ok(key) => {
                    self.store
                        .set_status(ctx, entry.table, &key, SyncStatus::Failed)
                        .await?;
                }
                Err(e) => warn!(
                    seq = entry.sequence_id,
                    table = %entry.table,
                    record = %entry.record_id,
                    error = %e,
                    "cannot mark record failed, queued key does not decode"
                ),
            }
        }
        Ok(pruned.len())
    }

    async fn push_entry(&self, ctx: &TenantContext, entry: &MutationQueueEntry) -> Result<()> {
        let key = entry.key()?;
        debug!(
            seq = entry.sequence_id,
            table = %entry.table,
            key = %key,
            op = %entry.operation,
            "pushing entry"
        );

        if entry.operation == Operation::Delete {
            return self.push_delete(ctx, entry.table, &key).await;
        }

        let Some(record) = self.store.get_by_id(ctx, entry.table, &key).await? else {
            debug!(seq = entry.sequence_id, "record no longer exists locally, nothing to push");
            return Ok(());
        };

        let row = self.registry.get(entry.table)?.to_wire(&record)?;
        self.remote.upsert(ctx, entry.table, vec![row]).await?;

        let children = match (entry.table, entry.table.child_relation()) {
            (Table::GoodsReceiving, Some(relation)) => {
                let parent = parent_id(entry.table, &key)?;
                Some(self.replace_children(ctx, relation, parent).await?)
            }
            (Table::Transactions, Some(relation)) if entry.operation == Operation::Insert => {
                let parent = parent_id(entry.table, &key)?;
                Some(self.insert_children(ctx, relation, parent).await?)
            }
            _ => None,
        };

        self.mark_pushed(ctx, &record).await?;
        for child in children.into_iter().flatten() {
            let mut synced = child.clone();
            synced.mark_synced();
            if !self.store.replace_if_unchanged(ctx, &child, &synced).await? {
                debug!(table = %child.table, key = %child.key, "child changed while pushing, left as is");
            }
        }
        Ok(())
    }

    /// Delete a row, and for aggregates the rows hanging off it.
    async fn push_delete(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<()> {
        self.remote.delete(ctx, table, key).await?;
        if let (Some(relation), Some(id)) = (table.child_relation(), key.as_id()) {
            self.remote
                .delete_where(ctx, relation.table, relation.wire_column, id)
                .await?;
        }
        Ok(())
    }

    /// Swap the remote child set of `parent` for the local one.
    async fn replace_children(
        &self,
        ctx: &TenantContext,
        relation: ChildRelation,
        parent_id: &str,
    ) -> Result<Vec<Record>> {
        self.remote
            .delete_where(ctx, relation.table, relation.wire_column, parent_id)
            .await?;
        self.insert_children(ctx, relation, parent_id).await
    }

    async fn insert_children(
        &self,
        ctx: &TenantContext,
        relation: ChildRelation,
        parent_id: &str,
    ) -> Result<Vec<Record>> {
        let children = self
            .store
            .children(ctx, relation.table, relation.local_field, parent_id)
            .await?;
        if children.is_empty() {
            return Ok(children);
        }

        let adapter = self.registry.get(relation.table)?;
        let rows = children
            .iter()
            .map(|child| adapter.to_wire(child))
            .collect::<tabsync_engine::Result<Vec<Value>>>()?;
        debug!(table = %relation.table, parent = parent_id, rows = rows.len(), "pushing children");
        self.remote.upsert(ctx, relation.table, rows).await?;
        Ok(children)
    }

    /// Record that the backend now holds `pushed`.
    ///
    /// Only the exact copy that was pushed turns `SYNCED`. Inventory also
    /// advances its agreed base level to the pushed quantity, so later merges
    /// only replay changes made after this push, even when a newer local
    /// edit keeps the record pending.
    async fn mark_pushed(&self, ctx: &TenantContext, pushed: &Record) -> Result<()> {
        let pushed_qty = match pushed.table {
            Table::Inventory => pushed.field("currentQty").cloned(),
            _ => None,
        };

        let mut synced = pushed.clone();
        if let Some(qty) = &pushed_qty {
            synced.set_field(SYNCED_QTY_FIELD, qty.clone());
        }
        synced.mark_synced();
        if self.store.replace_if_unchanged(ctx, pushed, &synced).await? {
            return Ok(());
        }

        debug!(table = %pushed.table, key = %pushed.key, "record changed while pushing, left pending");
        match pushed_qty {
            Some(qty) => self.advance_base(ctx, pushed, qty).await,
            None => Ok(()),
        }
    }

    async fn advance_base(&self, ctx: &TenantContext, pushed: &Record, qty: Value) -> Result<()> {
        for _ in 0..BASE_ADVANCE_ATTEMPTS {
            let Some(current) = self.store.get_by_id(ctx, pushed.table, &pushed.key).await? else {
                return Ok(());
            };
            let mut next = current.clone();
            next.set_field(SYNCED_QTY_FIELD, qty.clone());
            if next == current || self.store.replace_if_unchanged(ctx, &current, &next).await? {
                return Ok(());
            }
        }
        warn!(key = %pushed.key, "inventory kept changing, base level not advanced");
        Ok(())
    }
}

fn parent_id(table: Table, key: &RecordKey) -> Result<&str> {
    key.as_id().ok_or_else(|| {
        SyncError::Engine(tabsync_engine::Error::KeyMismatch {
            table,
            key: key.encode(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::remote::{MemoryRemote, RemoteError, RemoteOp};
    use crate::store::MemoryStore;
    use crate::ChangeTracker;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tabsync_engine::NewMutation;

    /// Remote that lands a local edit while its first upsert is in flight,
    /// then starts rejecting the table so the edit stays queued.
    struct EditDuringUpsert {
        inner: Arc<MemoryRemote>,
        tracker: ChangeTracker,
        edit: Mutex<Option<Record>>,
    }

    #[async_trait]
    impl RemoteStore for EditDuringUpsert {
        async fn upsert(&self, ctx: &TenantContext, table: Table, rows: Vec<Value>) -> std::result::Result<(), RemoteError> {
            self.inner.upsert(ctx, table, rows).await?;
            let edit = self.edit.lock().unwrap().take();
            if let Some(edit) = edit {
                self.tracker
                    .record_at(ctx, edit, Operation::Update, 200)
                    .await
                    .map_err(|e| RemoteError::Network(e.to_string()))?;
                self.inner.fail_table(table);
            }
            Ok(())
        }

        async fn delete(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> std::result::Result<(), RemoteError> {
            self.inner.delete(ctx, table, key).await
        }

        async fn delete_where(
            &self,
            ctx: &TenantContext,
            table: Table,
            column: &str,
            value: &str,
        ) -> std::result::Result<(), RemoteError> {
            self.inner.delete_where(ctx, table, column, value).await
        }

        async fn select_where(
            &self,
            ctx: &TenantContext,
            table: Table,
            column: &str,
            value: &str,
        ) -> std::result::Result<Vec<Value>, RemoteError> {
            self.inner.select_where(ctx, table, column, value).await
        }
    }

    struct Harness {
        ctx: TenantContext,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        remote: Arc<MemoryRemote>,
        tracker: ChangeTracker,
        push: PushSynchronizer,
    }

    fn harness() -> Harness {
        harness_with(&SyncSettings::default(), None)
    }

    /// `edit`, when given, is written locally during the first remote upsert.
    fn harness_with(settings: &SyncSettings, edit: Option<Record>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let remote = Arc::new(MemoryRemote::new());
        let rows: Arc<dyn RemoteStore> = match edit {
            Some(edit) => Arc::new(EditDuringUpsert {
                inner: remote.clone(),
                tracker: ChangeTracker::new(store.clone(), queue.clone()),
                edit: Mutex::new(Some(edit)),
            }),
            None => remote.clone(),
        };
        let push = PushSynchronizer::new(
            store.clone(),
            queue.clone(),
            rows,
            remote.clone(),
            Arc::new(AdapterRegistry::standard()),
            settings,
        );
        Harness {
            ctx: TenantContext::new("t1"),
            tracker: ChangeTracker::new(store.clone(), queue.clone()),
            store,
            queue,
            remote,
            push,
        }
    }

    fn stock(qty: f64) -> Record {
        Record::new(
            Table::Inventory,
            RecordKey::inventory("p1", ""),
            "t1",
            1,
            json!({"productId": "p1", "variantId": "", "currentQty": qty}),
        )
    }

    #[tokio::test]
    async fn inventory_push_decodes_key_and_advances_base() {
        let h = harness();
        h.tracker.insert(&h.ctx, stock(8.0)).await.unwrap();

        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report, PushReport { pushed: 1, failed: 0, pruned: 0 });

        let row = h.remote.row(Table::Inventory, "t1", &RecordKey::inventory("p1", "")).unwrap();
        assert_eq!(row["product_id"], "p1");
        assert_eq!(row["variant_id"], "");
        assert_eq!(row["current_qty"], 8.0);
        assert!(row.get("syncedQty").is_none());

        let local = h
            .store
            .get_by_id(&h.ctx, Table::Inventory, &RecordKey::inventory("p1", ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert_eq!(local.f64_field(SYNCED_QTY_FIELD), Some(8.0));
    }

    fn vendor(id: &str, name: &str) -> Record {
        Record::new(Table::Vendors, RecordKey::id(id), "t1", 1, json!({"name": name}))
    }

    #[tokio::test]
    async fn cycle_drains_queue_page_by_page() {
        let settings = SyncSettings {
            batch_size: 2,
            ..SyncSettings::default()
        };
        let h = harness_with(&settings, None);
        for i in 0..5 {
            h.tracker.insert(&h.ctx, vendor(&format!("v{i}"), "A")).await.unwrap();
        }

        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report, PushReport { pushed: 5, failed: 0, pruned: 0 });
        assert!(h.queue.is_empty(&h.ctx).await.unwrap());
        assert_eq!(h.remote.rows(Table::Vendors, "t1").len(), 5);
    }

    #[tokio::test]
    async fn failed_entries_are_tried_once_per_cycle() {
        let settings = SyncSettings {
            batch_size: 2,
            ..SyncSettings::default()
        };
        let h = harness_with(&settings, None);
        h.remote.fail_table(Table::Vendors);
        for i in 0..5 {
            h.tracker.insert(&h.ctx, vendor(&format!("v{i}"), "A")).await.unwrap();
        }

        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report, PushReport { pushed: 0, failed: 5, pruned: 0 });

        let left = h.queue.dequeue_batch(&h.ctx, 10).await.unwrap();
        assert_eq!(left.len(), 5);
        assert!(left.iter().all(|e| e.retry_count == 1));
    }

    #[tokio::test]
    async fn edit_during_push_stays_pending() {
        let mut edited = vendor("v1", "second");
        edited.set_field("phone", json!("0812"));
        let h = harness_with(&SyncSettings::default(), Some(edited));
        h.tracker.insert(&h.ctx, vendor("v1", "first")).await.unwrap();

        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(h.queue.dequeue_batch(&h.ctx, 10).await.unwrap().len(), 1);

        let key = RecordKey::id("v1");
        let local = h.store.get_by_id(&h.ctx, Table::Vendors, &key).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Pending);
        assert_eq!(local.str_field("name"), Some("second"));
        assert_eq!(h.remote.row(Table::Vendors, "t1", &key).unwrap()["name"], "first");

        h.remote.heal_table(Table::Vendors);
        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report.pushed, 1);

        let local = h.store.get_by_id(&h.ctx, Table::Vendors, &key).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert_eq!(h.remote.row(Table::Vendors, "t1", &key).unwrap()["name"], "second");
    }

    #[tokio::test]
    async fn inventory_edit_during_push_keeps_quantity_and_moves_base() {
        let mut edited = stock(5.0);
        edited.set_field(SYNCED_QTY_FIELD, json!(10.0));
        let h = harness_with(&SyncSettings::default(), Some(edited));

        let mut seeded = stock(10.0);
        seeded.set_field(SYNCED_QTY_FIELD, json!(10.0));
        seeded.mark_synced();
        h.store.upsert(&h.ctx, &seeded).await.unwrap();

        let mut sold = seeded.clone();
        sold.set_field("currentQty", json!(7.0));
        h.tracker.update(&h.ctx, sold).await.unwrap();

        h.push.run_cycle(&h.ctx).await.unwrap();

        let key = RecordKey::inventory("p1", "");
        let local = h.store.get_by_id(&h.ctx, Table::Inventory, &key).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Pending);
        assert_eq!(local.f64_field("currentQty"), Some(5.0));
        assert_eq!(local.f64_field(SYNCED_QTY_FIELD), Some(7.0));
        assert_eq!(h.remote.row(Table::Inventory, "t1", &key).unwrap()["current_qty"], 7.0);
    }

    #[tokio::test]
    async fn vanished_record_is_acked() {
        let h = harness();
        let record = Record::new(Table::Vendors, RecordKey::id("v1"), "t1", 1, json!({"name": "A"}));
        h.tracker.insert(&h.ctx, record).await.unwrap();
        h.store
            .delete_by_id(&h.ctx, Table::Vendors, &RecordKey::id("v1"))
            .await
            .unwrap();

        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(h.remote.total_calls(), 0);
        assert!(h.queue.is_empty(&h.ctx).await.unwrap());
    }

    #[tokio::test]
    async fn failures_do_not_block_the_batch() {
        let h = harness();
        h.remote.fail_table(Table::Products);
        let product = Record::new(
            Table::Products,
            RecordKey::id("p1"),
            "t1",
            1,
            json!({"name": "Es Teh", "price": 5000}),
        );
        let vendor = Record::new(Table::Vendors, RecordKey::id("v1"), "t1", 1, json!({"name": "A"}));
        h.tracker.insert(&h.ctx, product).await.unwrap();
        h.tracker.insert(&h.ctx, vendor).await.unwrap();

        let report = h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(report, PushReport { pushed: 1, failed: 1, pruned: 0 });

        let left = h.queue.dequeue_batch(&h.ctx, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].table, Table::Products);
        assert_eq!(left[0].retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_entries_escalate_to_failed() {
        let h = harness();
        h.remote.fail_table(Table::Vendors);
        let vendor = Record::new(Table::Vendors, RecordKey::id("v1"), "t1", 1, json!({"name": "A"}));
        h.tracker.insert(&h.ctx, vendor).await.unwrap();

        let mut pruned = 0;
        for _ in 0..3 {
            pruned += h.push.run_cycle(&h.ctx).await.unwrap().pruned;
        }
        assert_eq!(pruned, 1);
        assert!(h.queue.is_empty(&h.ctx).await.unwrap());

        let local = h
            .store
            .get_by_id(&h.ctx, Table::Vendors, &RecordKey::id("v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.sync_status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn undecodable_entry_is_pruned_without_error() {
        let h = harness();
        let mut broken = NewMutation::for_record(&stock(1.0), Operation::Update, 1);
        broken.record_id = "no-separator".into();
        h.queue.enqueue(broken).await.unwrap();

        let mut pruned = 0;
        for _ in 0..3 {
            let report = h.push.run_cycle(&h.ctx).await.unwrap();
            assert_eq!(report.pushed, 0);
            pruned += report.pruned;
        }
        assert_eq!(pruned, 1);
        assert!(h.queue.is_empty(&h.ctx).await.unwrap());
        assert_eq!(h.remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn transaction_items_only_on_insert() {
        let h = harness();
        let tx = Record::new(
            Table::Transactions,
            RecordKey::id("tx1"),
            "t1",
            1,
            json!({"date": 1_700_000_000_000i64, "total": 36000, "status": "PAID"}),
        );
        let item = Record::new(
            Table::TransactionItems,
            RecordKey::id("ti1"),
            "t1",
            1,
            json!({"transactionId": "tx1", "productId": "p1", "qty": 2, "unitPrice": 18000, "subtotal": 36000}),
        );
        h.store.upsert(&h.ctx, &item).await.unwrap();
        h.tracker.insert(&h.ctx, tx.clone()).await.unwrap();
        h.push.run_cycle(&h.ctx).await.unwrap();

        assert_eq!(h.remote.rows(Table::TransactionItems, "t1").len(), 1);
        let item_status = h
            .store
            .get_by_id(&h.ctx, Table::TransactionItems, &RecordKey::id("ti1"))
            .await
            .unwrap()
            .unwrap()
            .sync_status;
        assert_eq!(item_status, SyncStatus::Synced);

        let mut voided = tx;
        voided.set_field("status", json!("VOID"));
        h.tracker.update(&h.ctx, voided).await.unwrap();
        let upserts_before = h.remote.call_count(RemoteOp::Upsert);
        h.push.run_cycle(&h.ctx).await.unwrap();

        assert_eq!(h.remote.call_count(RemoteOp::Upsert), upserts_before + 1);
        let row = h.remote.row(Table::Transactions, "t1", &RecordKey::id("tx1")).unwrap();
        assert_eq!(row["status"], "VOID");
    }

    #[tokio::test]
    async fn delete_removes_remote_children() {
        let h = harness();
        let parent = Record::new(
            Table::GoodsReceiving,
            RecordKey::id("gr1"),
            "t1",
            1,
            json!({"date": 1_700_000_000_000i64}),
        );
        let item = Record::new(
            Table::GoodsReceivingItems,
            RecordKey::id("i1"),
            "t1",
            1,
            json!({"receivingId": "gr1", "productId": "p1", "qty": 3.0}),
        );
        h.store.upsert(&h.ctx, &item).await.unwrap();
        h.tracker.insert(&h.ctx, parent.clone()).await.unwrap();
        h.push.run_cycle(&h.ctx).await.unwrap();
        assert_eq!(h.remote.rows(Table::GoodsReceivingItems, "t1").len(), 1);

        h.tracker.delete(&h.ctx, parent).await.unwrap();
        let report = h.push.run_cycle(&h.ctx).await.unwrap();

        assert_eq!(report.pushed, 1);
        assert!(h.remote.rows(Table::GoodsReceiving, "t1").is_empty());
        assert!(h.remote.rows(Table::GoodsReceivingItems, "t1").is_empty());
    }
}
