//! End-to-end push scenarios against the in-process backend.

use serde_json::json;
use std::sync::Arc;
use tabsync_client::{
    db, ChangeTracker, LocalStore, MemoryQueue, MemoryRemote, MemoryStore, MutationQueue,
    PushReport, PushSynchronizer, RemoteOp, SqliteQueue, SqliteStore, SyncSettings,
    TenantContext,
};
use tabsync_engine::{AdapterRegistry, Operation, Record, RecordKey, SyncStatus, Table};

struct Device {
    ctx: TenantContext,
    store: Arc<dyn LocalStore>,
    queue: Arc<dyn MutationQueue>,
    remote: Arc<MemoryRemote>,
    tracker: ChangeTracker,
    push: PushSynchronizer,
}

impl Device {
    fn new(store: Arc<dyn LocalStore>, queue: Arc<dyn MutationQueue>) -> Self {
        Self::with_settings(store, queue, &SyncSettings::default())
    }

    fn with_settings(store: Arc<dyn LocalStore>, queue: Arc<dyn MutationQueue>, settings: &SyncSettings) -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let push = PushSynchronizer::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            remote.clone(),
            Arc::new(AdapterRegistry::standard()),
            settings,
        );
        Self {
            ctx: TenantContext::new("resto-1"),
            tracker: ChangeTracker::new(store.clone(), queue.clone()),
            store,
            queue,
            remote,
            push,
        }
    }

    fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()))
    }

    async fn sqlite() -> Self {
        let pool = db::in_memory().await.unwrap();
        Self::new(
            Arc::new(SqliteStore::new(pool.clone())),
            Arc::new(SqliteQueue::new(pool)),
        )
    }

    async fn status(&self, table: Table, id: &str) -> Option<SyncStatus> {
        self.store
            .get_by_id(&self.ctx, table, &RecordKey::id(id))
            .await
            .unwrap()
            .map(|r| r.sync_status)
    }
}

fn category(id: &str) -> Record {
    Record::new(
        Table::Categories,
        RecordKey::id(id),
        "resto-1",
        0,
        json!({"name": "Drinks", "sortOrder": 1}),
    )
}

fn receiving_item(id: &str, qty: f64) -> Record {
    Record::new(
        Table::GoodsReceivingItems,
        RecordKey::id(id),
        "resto-1",
        0,
        json!({"receivingId": "gr1", "productId": "p1", "qty": qty, "costPerUnit": 1500.0}),
    )
}

async fn scenario_a(device: Device) {
    device.tracker.insert(&device.ctx, category("cat1")).await.unwrap();

    let report = device.push.run_cycle(&device.ctx).await.unwrap();

    assert_eq!(report, PushReport { pushed: 1, failed: 0, pruned: 0 });
    assert_eq!(device.remote.call_count(RemoteOp::Upsert), 1);
    assert!(device.queue.is_empty(&device.ctx).await.unwrap());
    assert_eq!(device.status(Table::Categories, "cat1").await, Some(SyncStatus::Synced));

    let row = device
        .remote
        .row(Table::Categories, "resto-1", &RecordKey::id("cat1"))
        .unwrap();
    assert_eq!(row["sort_order"], 1);
    assert_eq!(row["sync_status"], "SYNCED");
}

#[tokio::test]
async fn scenario_a_push_online() {
    scenario_a(Device::in_memory()).await;
}

#[tokio::test]
async fn scenario_a_push_online_sqlite() {
    scenario_a(Device::sqlite().await).await;
}

#[tokio::test]
async fn scenario_b_offline_is_a_no_op() {
    let device = Device::sqlite().await;
    device.tracker.insert(&device.ctx, category("cat1")).await.unwrap();
    device.remote.set_online(false);

    let report = device.push.run_cycle(&device.ctx).await.unwrap();

    assert_eq!(report, PushReport::default());
    assert_eq!(device.remote.total_calls(), 0);
    assert_eq!(device.queue.len(&device.ctx).await.unwrap(), 1);
    assert_eq!(device.status(Table::Categories, "cat1").await, Some(SyncStatus::Pending));
}

#[tokio::test]
async fn scenario_c_exhausted_entry_is_pruned_and_never_pushed() {
    let device = Device::in_memory();
    device.tracker.insert(&device.ctx, category("cat1")).await.unwrap();
    device.remote.fail_table(Table::Categories);

    for cycle in 1..=3 {
        let report = device.push.run_cycle(&device.ctx).await.unwrap();
        assert_eq!(report.failed, 1, "cycle {cycle}");
    }
    assert!(device.queue.is_empty(&device.ctx).await.unwrap());

    device.remote.heal_table(Table::Categories);
    let report = device.push.run_cycle(&device.ctx).await.unwrap();
    assert_eq!(report, PushReport::default());
    assert!(device.remote.rows(Table::Categories, "resto-1").is_empty());
    assert_eq!(device.status(Table::Categories, "cat1").await, Some(SyncStatus::Failed));
}

#[tokio::test]
async fn scenario_d_goods_receiving_replaces_items() {
    let device = Device::sqlite().await;
    let ctx = &device.ctx;
    let receiving = Record::new(
        Table::GoodsReceiving,
        RecordKey::id("gr1"),
        "resto-1",
        0,
        json!({"vendorId": "v1", "date": 1_706_745_600_000i64}),
    );

    // First version: two items.
    for item in [receiving_item("old-1", 1.0), receiving_item("old-2", 2.0)] {
        device.store.upsert(ctx, &item).await.unwrap();
    }
    device.tracker.insert(ctx, receiving.clone()).await.unwrap();
    device.push.run_cycle(ctx).await.unwrap();
    assert_eq!(device.remote.rows(Table::GoodsReceivingItems, "resto-1").len(), 2);

    // Edited on the device: old items replaced by three new ones.
    for id in ["old-1", "old-2"] {
        device
            .store
            .delete_by_id(ctx, Table::GoodsReceivingItems, &RecordKey::id(id))
            .await
            .unwrap();
    }
    for (i, id) in ["new-1", "new-2", "new-3"].iter().enumerate() {
        device.store.upsert(ctx, &receiving_item(id, i as f64 + 1.0)).await.unwrap();
    }
    device.tracker.update(ctx, receiving).await.unwrap();
    let report = device.push.run_cycle(ctx).await.unwrap();
    assert_eq!(report.pushed, 1);

    let ids: Vec<String> = device
        .remote
        .rows(Table::GoodsReceivingItems, "resto-1")
        .iter()
        .map(|row| row["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["new-1", "new-2", "new-3"]);
    for id in ["new-1", "new-2", "new-3"] {
        assert_eq!(
            device.status(Table::GoodsReceivingItems, id).await,
            Some(SyncStatus::Synced)
        );
    }
}

#[tokio::test]
async fn queue_order_is_preserved_across_cycles() {
    let device = Device::in_memory();
    let ctx = &device.ctx;

    let mut record = category("cat1");
    device.tracker.insert(ctx, record.clone()).await.unwrap();
    record.set_field("name", json!("Hot Drinks"));
    device.tracker.update(ctx, record.clone()).await.unwrap();
    device.tracker.record(ctx, record, Operation::Delete).await.unwrap();

    let report = device.push.run_cycle(ctx).await.unwrap();

    // The record is gone locally, so the insert and update have nothing to
    // send; only the delete reaches the backend.
    assert_eq!(report.pushed, 3);
    assert_eq!(device.remote.call_count(RemoteOp::Upsert), 0);
    assert_eq!(device.remote.call_count(RemoteOp::Delete), 1);
    assert!(device.queue.is_empty(ctx).await.unwrap());
}

#[tokio::test]
async fn tenants_do_not_see_each_others_queue() {
    let device = Device::in_memory();
    let other = TenantContext::new("resto-2");
    device.tracker.insert(&device.ctx, category("cat1")).await.unwrap();

    let report = device.push.run_cycle(&other).await.unwrap();
    assert_eq!(report, PushReport::default());
    assert_eq!(device.queue.len(&device.ctx).await.unwrap(), 1);
}

async fn small_batches_drain_everything(device: Device) {
    for i in 0..5 {
        device.tracker.insert(&device.ctx, category(&format!("cat{i}"))).await.unwrap();
    }

    let report = device.push.run_cycle(&device.ctx).await.unwrap();

    assert_eq!(report, PushReport { pushed: 5, failed: 0, pruned: 0 });
    assert!(device.queue.is_empty(&device.ctx).await.unwrap());
    assert_eq!(device.remote.rows(Table::Categories, "resto-1").len(), 5);
    for i in 0..5 {
        assert_eq!(
            device.status(Table::Categories, &format!("cat{i}")).await,
            Some(SyncStatus::Synced)
        );
    }
}

fn two_per_page() -> SyncSettings {
    SyncSettings {
        batch_size: 2,
        ..SyncSettings::default()
    }
}

#[tokio::test]
async fn small_batches_drain_everything_in_memory() {
    let device = Device::with_settings(Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()), &two_per_page());
    small_batches_drain_everything(device).await;
}

#[tokio::test]
async fn small_batches_drain_everything_sqlite() {
    let pool = db::in_memory().await.unwrap();
    let device = Device::with_settings(
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(SqliteQueue::new(pool)),
        &two_per_page(),
    );
    small_batches_drain_everything(device).await;
}
