//! Record types for synced entities.

use crate::{Error, RecordKey, Result, Table, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Synchronization state of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Changed locally, not yet pushed
    #[default]
    Pending,
    /// A push is in flight
    Syncing,
    /// Local copy matches the backend
    Synced,
    /// Push attempts exhausted
    Failed,
    /// Diverged from the backend and needs attention
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Conflict => "CONFLICT",
        }
    }

    /// Whether the local copy carries a change the backend has not seen.
    pub fn has_local_changes(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(SyncStatus::Pending),
            "SYNCING" => Ok(SyncStatus::Syncing),
            "SYNCED" => Ok(SyncStatus::Synced),
            "FAILED" => Ok(SyncStatus::Failed),
            "CONFLICT" => Ok(SyncStatus::Conflict),
            other => Err(Error::InvalidSyncStatus(other.to_string())),
        }
    }
}

/// A record in the local store.
///
/// `fields` holds the entity's own columns under their local (camelCase)
/// names. Key, tenant, status and timestamp live beside it because every
/// table has them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub table: Table,
    pub key: RecordKey,
    pub tenant_id: TenantId,
    pub sync_status: SyncStatus,
    /// Last modification (milliseconds since epoch)
    pub updated_at: Timestamp,
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record that has not been pushed yet.
    ///
    /// Non-object `fields` values are treated as empty.
    pub fn new(
        table: Table,
        key: RecordKey,
        tenant_id: impl Into<TenantId>,
        updated_at: Timestamp,
        fields: Value,
    ) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            table,
            key,
            tenant_id: tenant_id.into(),
            sync_status: SyncStatus::Pending,
            updated_at,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn f64_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Record a local modification: bumps the timestamp and resets the
    /// record to [`SyncStatus::Pending`].
    pub fn touch(&mut self, timestamp: Timestamp) {
        self.updated_at = timestamp;
        self.sync_status = SyncStatus::Pending;
    }

    pub fn mark_synced(&mut self) {
        self.sync_status = SyncStatus::Synced;
    }

    /// Snapshot of the fields, as stored in queue entries.
    pub fn payload(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn category() -> Record {
        Record::new(
            Table::Categories,
            RecordKey::id("cat-1"),
            "tenant-1",
            1000,
            json!({"name": "Drinks", "sortOrder": 1}),
        )
    }

    #[test]
    fn new_record_is_pending() {
        let record = category();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.str_field("name"), Some("Drinks"));
        assert_eq!(record.f64_field("sortOrder"), Some(1.0));
    }

    #[test]
    fn touch_resets_to_pending() {
        let mut record = category();
        record.mark_synced();
        assert_eq!(record.sync_status, SyncStatus::Synced);

        record.set_field("name", json!("Hot drinks"));
        record.touch(2000);
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.updated_at, 2000);
    }

    #[test]
    fn non_object_fields_become_empty() {
        let record = Record::new(
            Table::Vendors,
            RecordKey::id("v1"),
            "t",
            0,
            json!("oops"),
        );
        assert!(record.fields.is_empty());
    }

    #[test]
    fn status_strings() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Synced,
            SyncStatus::Failed,
            SyncStatus::Conflict,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("DONE".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn only_synced_has_no_local_changes() {
        assert!(!SyncStatus::Synced.has_local_changes());
        assert!(SyncStatus::Pending.has_local_changes());
        assert!(SyncStatus::Failed.has_local_changes());
    }
}
