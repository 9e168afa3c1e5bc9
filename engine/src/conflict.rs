//! Conflict resolution policy.
//!
//! When a local and a remote version of the same record collide, the
//! resolver picks a [`Decision`] from the table alone plus the two
//! modification timestamps:
//!
//! | Tables | Decision |
//! |---|---|
//! | transactions, transaction items, goods receiving, goods receiving items | always keep local |
//! | inventory | always merge |
//! | everything else | last writer wins, ties go to local |
//!
//! Sales and receipts are recorded once, on the device that took them, so
//! that device is authoritative. Stock levels are shared counters: both
//! sides may have moved them, so they are merged.

use crate::{Record, SyncStatus, Table, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local field remembering the last stock level both sides agreed on.
///
/// Written whenever a remote inventory row is applied; never sent on the
/// wire because the inventory adapter does not map it.
pub const SYNCED_QTY_FIELD: &str = "syncedQty";

const CURRENT_QTY_FIELD: &str = "currentQty";
const MIN_QTY_FIELD: &str = "minQty";

/// Outcome of a conflict between a local and a remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    KeepLocal,
    KeepRemote,
    Merge,
}

/// Decide which version of a record prevails.
pub fn resolve(table: Table, local_updated_at: Timestamp, remote_updated_at: Timestamp) -> Decision {
    if table.is_business_event() {
        return Decision::KeepLocal;
    }
    if table == Table::Inventory {
        return Decision::Merge;
    }
    if local_updated_at >= remote_updated_at {
        Decision::KeepLocal
    } else {
        Decision::KeepRemote
    }
}

/// Merge two concurrent values of a shared counter.
///
/// With a known `base` (the last value both sides agreed on) the local delta
/// is replayed on top of the remote value, so neither side's movement is
/// lost. Without a base there is nothing to diff against and the newer
/// side wins.
pub fn merge_quantity(
    base: Option<f64>,
    local: f64,
    remote: f64,
    local_updated_at: Timestamp,
    remote_updated_at: Timestamp,
) -> f64 {
    match base {
        _ if local == remote => local,
        Some(base) if base == remote => local,
        Some(base) if base == local => remote,
        Some(base) => remote + (local - base),
        None if local_updated_at >= remote_updated_at => local,
        None => remote,
    }
}

/// Merge a local inventory record that has unpushed changes with the
/// incoming remote version.
///
/// The result keeps local changes pending (so the merged value is pushed)
/// and remembers the remote level as the new agreed base.
pub fn merge_inventory(local: &Record, remote: &Record) -> Record {
    let remote_qty = remote.f64_field(CURRENT_QTY_FIELD).unwrap_or(0.0);
    let local_qty = local.f64_field(CURRENT_QTY_FIELD).unwrap_or(remote_qty);

    let current_qty = merge_quantity(
        local.f64_field(SYNCED_QTY_FIELD),
        local_qty,
        remote_qty,
        local.updated_at,
        remote.updated_at,
    );

    let mut merged = remote.clone();
    merged.set_field(CURRENT_QTY_FIELD, Value::from(current_qty));
    if local.updated_at >= remote.updated_at {
        if let Some(min_qty) = local.field(MIN_QTY_FIELD) {
            merged.set_field(MIN_QTY_FIELD, min_qty.clone());
        }
    }
    merged.set_field(SYNCED_QTY_FIELD, Value::from(remote_qty));
    merged.updated_at = local.updated_at.max(remote.updated_at);
    merged.sync_status = SyncStatus::Pending;
    merged
}
