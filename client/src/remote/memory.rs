//! In-process backend.
//!
//! Behaves like the tabsync server for one process: rows are validated with
//! the engine adapters, every write is broadcast to matching subscribers,
//! and calls are logged. Connectivity and per-table failures can be toggled,
//! which makes it the backend of choice for tests and offline demos.

use super::{ChangeFeed, Connectivity, FeedStream, RemoteError, RemoteStore};
use crate::TenantContext;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::future::ready;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tabsync_engine::{AdapterRegistry, ChangeEvent, EventType, RecordKey, Table, TableFilter, TenantId};
use tokio::sync::broadcast;
use tracing::warn;

const FEED_CAPACITY: usize = 1024;

/// Kind of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Upsert,
    Delete,
    DeleteWhere,
    SelectWhere,
}

/// A logged remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub table: Table,
}

type Slot = (Table, TenantId, String);

pub struct MemoryRemote {
    registry: AdapterRegistry,
    rows: DashMap<Slot, Value>,
    online: AtomicBool,
    failing: DashSet<Table>,
    latency_ms: AtomicU64,
    calls: Mutex<Vec<RemoteCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    subscriptions: AtomicUsize,
    feed: RwLock<broadcast::Sender<ChangeEvent>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_registry(AdapterRegistry::standard())
    }

    pub fn with_registry(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            rows: DashMap::new(),
            online: AtomicBool::new(true),
            failing: DashSet::new(),
            latency_ms: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            feed: RwLock::new(broadcast::channel(FEED_CAPACITY).0),
        }
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Going offline also drops every open subscription.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.drop_subscribers();
        }
    }

    /// Make every call touching `table` fail with a 503.
    pub fn fail_table(&self, table: Table) {
        self.failing.insert(table);
    }

    pub fn heal_table(&self, table: Table) {
        self.failing.remove(&table);
    }

    /// Delay every call, so concurrent callers overlap.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// End every open subscription stream.
    pub fn drop_subscribers(&self) {
        let mut feed = self.feed.write().unwrap_or_else(PoisonError::into_inner);
        *feed = broadcast::channel(FEED_CAPACITY).0;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls().len()
    }

    /// Highest number of calls ever in flight at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Subscriptions opened so far.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn row(&self, table: Table, tenant_id: &str, key: &RecordKey) -> Option<Value> {
        self.rows
            .get(&(table, tenant_id.to_string(), key.encode()))
            .map(|r| r.value().clone())
    }

    /// Rows of a tenant's table, ordered by key.
    pub fn rows(&self, table: Table, tenant_id: &str) -> Vec<Value> {
        self.rows_matching(table, tenant_id, |_| true)
            .into_iter()
            .map(|(_, row)| row)
            .collect()
    }

    // ------------------------------------------------------------------
    // Writes from other devices
    // ------------------------------------------------------------------

    /// Store a row as if another device had written it, and broadcast it.
    pub fn put_row(&self, table: Table, row: Value) -> Result<(), RemoteError> {
        let (slot, row) = self.validate(None, table, row)?;
        self.store(slot, table, row);
        Ok(())
    }

    /// Delete a row as if another device had, and broadcast the tombstone.
    pub fn remove_row(&self, table: Table, tenant_id: &str, key: &RecordKey) -> bool {
        self.remove((table, tenant_id.to_string(), key.encode()))
    }

    /// Broadcast an arbitrary event without touching stored rows.
    pub fn publish(&self, event: ChangeEvent) {
        let feed = self.feed.read().unwrap_or_else(PoisonError::into_inner);
        // No receivers is fine: nobody is subscribed.
        let _ = feed.send(event);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn admit(&self, op: RemoteOp, table: Table) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RemoteCall { op, table });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("backend unreachable".into()));
        }
        if self.failing.contains(&table) {
            return Err(RemoteError::Status {
                status: 503,
                body: format!("injected failure for {table}"),
            });
        }
        Ok(())
    }

    fn validate(&self, ctx: Option<&TenantContext>, table: Table, row: Value) -> Result<(Slot, Value), RemoteError> {
        let bad_request = |e: tabsync_engine::Error| RemoteError::Status {
            status: 400,
            body: e.to_string(),
        };
        let adapter = self.registry.get(table).map_err(bad_request)?;
        adapter.from_wire(&row).map_err(bad_request)?;
        let key = adapter.key_from_wire(&row).map_err(bad_request)?;
        let tenant = adapter.tenant_from_wire(&row).map_err(bad_request)?.to_string();

        if let Some(ctx) = ctx {
            if ctx.tenant_id() != tenant {
                return Err(RemoteError::Status {
                    status: 403,
                    body: format!("row belongs to tenant {tenant}"),
                });
            }
        }
        Ok(((table, tenant, key.encode()), row))
    }

    fn store(&self, slot: Slot, table: Table, row: Value) {
        let event_type = match self.rows.insert(slot, row.clone()) {
            Some(_) => EventType::Update,
            None => EventType::Insert,
        };
        self.publish(ChangeEvent::upsert(table, event_type, row));
    }

    fn remove(&self, slot: Slot) -> bool {
        let table = slot.0;
        match self.rows.remove(&slot) {
            Some((_, old)) => {
                self.publish(ChangeEvent::delete(table, old));
                true
            }
            None => false,
        }
    }

    fn rows_matching<F>(&self, table: Table, tenant_id: &str, keep: F) -> Vec<(Slot, Value)>
    where
        F: Fn(&Value) -> bool,
    {
        let mut rows: Vec<(Slot, Value)> = self
            .rows
            .iter()
            .filter(|e| e.key().0 == table && e.key().1 == tenant_id && keep(e.value()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0 .2.cmp(&b.0 .2));
        rows
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn column_equals(row: &Value, column: &str, value: &str) -> bool {
    row.get(column).and_then(Value::as_str) == Some(value)
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, ctx: &TenantContext, table: Table, rows: Vec<Value>) -> Result<(), RemoteError> {
        self.admit(RemoteOp::Upsert, table).await?;
        let validated = rows
            .into_iter()
            .map(|row| self.validate(Some(ctx), table, row))
            .collect::<Result<Vec<_>, _>>()?;
        for (slot, row) in validated {
            self.store(slot, table, row);
        }
        Ok(())
    }

    async fn delete(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<(), RemoteError> {
        self.admit(RemoteOp::Delete, table).await?;
        self.remove((table, ctx.tenant_id().to_string(), key.encode()));
        Ok(())
    }

    async fn delete_where(
        &self,
        ctx: &TenantContext,
        table: Table,
        column: &str,
        value: &str,
    ) -> Result<(), RemoteError> {
        self.admit(RemoteOp::DeleteWhere, table).await?;
        for (slot, _) in self.rows_matching(table, ctx.tenant_id(), |row| column_equals(row, column, value)) {
            self.remove(slot);
        }
        Ok(())
    }

    async fn select_where(
        &self,
        ctx: &TenantContext,
        table: Table,
        column: &str,
        value: &str,
    ) -> Result<Vec<Value>, RemoteError> {
        self.admit(RemoteOp::SelectWhere, table).await?;
        Ok(self
            .rows_matching(table, ctx.tenant_id(), |row| column_equals(row, column, value))
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}

#[async_trait]
impl ChangeFeed for MemoryRemote {
    async fn subscribe(&self, _ctx: &TenantContext, filters: Vec<TableFilter>) -> Result<FeedStream, RemoteError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("backend unreachable".into()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let receiver = self
            .feed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();

        let events = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((Ok(event), receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged behind the feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(events
            .filter(move |item: &Result<ChangeEvent, RemoteError>| {
                ready(match item {
                    Ok(event) => filters.iter().any(|f| f.matches(event)),
                    Err(_) => true,
                })
            })
            .boxed())
    }
}

#[async_trait]
impl Connectivity for MemoryRemote {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
