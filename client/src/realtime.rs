//! Realtime change reconciler.
//!
//! A long-lived task per tenant session: subscribes to the change feed with
//! one tenant filter per table, catches up on anything missed while
//! disconnected, then applies each event to the local store. A dropped feed
//! is torn down completely and resubscribed with backoff.
//!
//! Applying is idempotent and resolver-gated: a remote row only overwrites a
//! local record that has no unpushed change, otherwise [`resolve`] decides.

use crate::config::SyncSettings;
use crate::queue::MutationQueue;
use crate::remote::{ChangeFeed, FeedStream, RemoteError, RemoteStore};
use crate::store::LocalStore;
use crate::{now_millis, Result, TenantContext};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tabsync_engine::{
    merge_inventory, resolve, tenant_filters, AdapterRegistry, ChangeEvent, Decision, Error,
    EventType, NewMutation, Operation, Record, Table, UPDATED_AT_COLUMN, SYNCED_QTY_FIELD,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What applying one remote change did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The remote row was written locally.
    Applied,
    /// The local record was removed.
    Deleted,
    /// Local and remote inventory were merged; the result is pending.
    Merged,
    /// The local record has unpushed changes that win.
    KeptLocal,
    /// The local store already reflects the change.
    Unchanged,
}

pub struct RealtimeReconciler {
    store: Arc<dyn LocalStore>,
    queue: Arc<dyn MutationQueue>,
    remote: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    registry: Arc<AdapterRegistry>,
    catch_up_on_connect: bool,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl RealtimeReconciler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        queue: Arc<dyn MutationQueue>,
        remote: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        registry: Arc<AdapterRegistry>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            feed,
            registry,
            catch_up_on_connect: settings.catch_up_on_connect,
            reconnect_delay: settings.reconnect_delay,
            max_reconnect_delay: settings.max_reconnect_delay,
        }
    }

    // ========================================================================
    // Applying changes
    // ========================================================================

    /// Apply one feed event to the local store.
    pub async fn apply_event(&self, ctx: &TenantContext, event: &ChangeEvent) -> Result<ApplyOutcome> {
        match (event.event_type, &event.new, &event.old) {
            (EventType::Insert | EventType::Update, Some(row), _) => {
                self.apply_remote_row(ctx, event.table, row).await
            }
            (EventType::Delete, _, Some(old)) => self.apply_remote_delete(ctx, event.table, old).await,
            (event_type, _, _) => Err(Error::InvalidPayload(format!(
                "{event_type:?} event on {} without its row",
                event.table
            ))
            .into()),
        }
    }

    /// Apply a remote insert or update.
    pub async fn apply_remote_row(&self, ctx: &TenantContext, table: Table, row: &Value) -> Result<ApplyOutcome> {
        let mut remote = self.registry.get(table)?.from_wire(row)?;
        ctx.check(&remote)?;

        let local = self.store.get_by_id(ctx, table, &remote.key).await?;
        if local.is_none() && self.delete_pending(ctx, table, &remote).await? {
            debug!(table = %table, key = %remote.key, "local delete not pushed yet, remote row ignored");
            return Ok(ApplyOutcome::KeptLocal);
        }
        let local = match local {
            Some(local) if local.sync_status.has_local_changes() => local,
            existing => {
                if table == Table::Inventory {
                    remember_base(&mut remote);
                }
                if existing.as_ref() == Some(&remote) {
                    return Ok(ApplyOutcome::Unchanged);
                }
                self.store.upsert(ctx, &remote).await?;
                return Ok(ApplyOutcome::Applied);
            }
        };

        match resolve(table, local.updated_at, remote.updated_at) {
            Decision::KeepLocal => Ok(ApplyOutcome::KeptLocal),
            Decision::KeepRemote => {
                self.store.upsert(ctx, &remote).await?;
                Ok(ApplyOutcome::Applied)
            }
            Decision::Merge => self.merge(ctx, &local, &remote).await,
        }
    }

    async fn delete_pending(&self, ctx: &TenantContext, table: Table, remote: &Record) -> Result<bool> {
        let latest = self.queue.latest_for(ctx, table, &remote.key.encode()).await?;
        Ok(latest.is_some_and(|entry| entry.operation == Operation::Delete))
    }

    async fn merge(&self, ctx: &TenantContext, local: &Record, remote: &Record) -> Result<ApplyOutcome> {
        let merged = merge_inventory(local, remote);
        if merged == *local {
            return Ok(ApplyOutcome::Unchanged);
        }
        self.store.upsert(ctx, &merged).await?;

        // The backend only needs the merged level if it differs from what it
        // already has.
        if merged.field("currentQty") != remote.field("currentQty") {
            let seq = self
                .queue
                .enqueue(NewMutation::for_record(&merged, Operation::Update, now_millis()))
                .await?;
            debug!(seq, key = %merged.key, "merged inventory queued");
        }
        Ok(ApplyOutcome::Merged)
    }

    /// Apply a remote delete. Only the key is read from the tombstone.
    pub async fn apply_remote_delete(&self, ctx: &TenantContext, table: Table, old: &Value) -> Result<ApplyOutcome> {
        let adapter = self.registry.get(table)?;
        let key = adapter.key_from_wire(old)?;
        if let Ok(tenant) = adapter.tenant_from_wire(old) {
            ctx.check_tenant(tenant)?;
        }

        let Some(local) = self.store.get_by_id(ctx, table, &key).await? else {
            return Ok(ApplyOutcome::Unchanged);
        };

        if local.sync_status.has_local_changes() {
            // A tombstone without a timestamp is older than any local edit.
            let deleted_at = old
                .get(UPDATED_AT_COLUMN)
                .and_then(Value::as_i64)
                .unwrap_or(i64::MIN);
            if resolve(table, local.updated_at, deleted_at) == Decision::KeepLocal {
                return Ok(ApplyOutcome::KeptLocal);
            }
        }

        self.store.delete_by_id(ctx, table, &key).await?;
        Ok(ApplyOutcome::Deleted)
    }

    /// Pull every table's tenant rows and apply them.
    ///
    /// Rows that fail to apply are skipped; the count is of rows applied.
    pub async fn catch_up(&self, ctx: &TenantContext) -> Result<usize> {
        let mut applied = 0;
        for table in self.registry.tables() {
            let rows = self
                .remote
                .select_where(ctx, table, table.tenant_column(), ctx.tenant_id())
                .await?;
            for row in &rows {
                match self.apply_remote_row(ctx, table, row).await {
                    Ok(ApplyOutcome::Unchanged | ApplyOutcome::KeptLocal) => {}
                    Ok(_) => applied += 1,
                    Err(e) if e.is_local() => return Err(e),
                    Err(e) => warn!(table = %table, error = %e, "skipping pulled row"),
                }
            }
        }
        Ok(applied)
    }

    // ========================================================================
    // Subscription loop
    // ========================================================================

    /// Run the reconciler until `cancel` fires.
    pub fn spawn(self: Arc<Self>, ctx: TenantContext, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(ctx, cancel).await })
    }

    async fn run(&self, ctx: TenantContext, cancel: CancellationToken) {
        let filters = tenant_filters(&self.registry.tables(), ctx.tenant_id());
        let mut delay = self.reconnect_delay;
        info!(tenant = %ctx.tenant_id(), tables = filters.len(), "realtime reconciler started");

        loop {
            let subscribed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.feed.subscribe(&ctx, filters.clone()) => result,
            };

            match subscribed {
                Ok(stream) => {
                    delay = self.reconnect_delay;
                    if self.catch_up_on_connect {
                        match self.catch_up(&ctx).await {
                            Ok(applied) => debug!(applied, "caught up with remote"),
                            Err(e) => warn!(error = %e, "catch-up pull failed"),
                        }
                    }
                    self.consume(&ctx, stream, &cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(tenant = %ctx.tenant_id(), "change feed dropped, resubscribing");
                }
                Err(e) => warn!(tenant = %ctx.tenant_id(), error = %e, "subscribe failed"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.max_reconnect_delay);
        }

        info!(tenant = %ctx.tenant_id(), "realtime reconciler stopped");
    }

    /// Apply events until the stream ends, fails or `cancel` fires.
    async fn consume(&self, ctx: &TenantContext, mut stream: FeedStream, cancel: &CancellationToken) {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => match self.apply_event(ctx, &event).await {
                    Ok(outcome) => debug!(table = %event.table, ?outcome, "applied remote change"),
                    Err(e) => warn!(table = %event.table, error = %e, "skipping remote change"),
                },
                Some(Err(RemoteError::Decode(e))) => warn!(error = %e, "skipping undecodable message"),
                Some(Err(e)) => {
                    warn!(error = %e, "change feed failed");
                    return;
                }
                None => return,
            }
        }
    }
}

/// A freshly applied inventory row is the new agreed level.
fn remember_base(record: &mut Record) {
    if let Some(qty) = record.field("currentQty").cloned() {
        record.set_field(SYNCED_QTY_FIELD, qty);
    }
}
