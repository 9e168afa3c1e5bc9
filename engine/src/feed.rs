//! Change feed protocol.
//!
//! The backend publishes row changes per table. A device subscribes once per
//! tenant with one filter per table; the server only forwards changes whose
//! row matches a filter. All messages are JSON and use snake_case.

use crate::{Table, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// A remote-originated row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub event_type: EventType,
    /// Row after the change (inserts and updates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Row before the change (deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn upsert(table: Table, event_type: EventType, row: Value) -> Self {
        Self {
            table,
            event_type,
            new: Some(row),
            old: None,
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            table,
            event_type: EventType::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// The row a filter is evaluated against.
    pub fn row(&self) -> Option<&Value> {
        match self.event_type {
            EventType::Delete => self.old.as_ref(),
            EventType::Insert | EventType::Update => self.new.as_ref(),
        }
    }
}

/// Server-side filter: `column = value` on one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableFilter {
    pub table: Table,
    pub column: String,
    pub value: String,
}

impl TableFilter {
    /// Filter on the table's tenant column.
    pub fn for_tenant(table: Table, tenant_id: &str) -> Self {
        Self {
            table,
            column: table.tenant_column().to_string(),
            value: tenant_id.to_string(),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && event
                .row()
                .and_then(|row| row.get(&self.column))
                .and_then(Value::as_str)
                == Some(self.value.as_str())
    }
}

/// One filter per table, all scoped to `tenant_id`.
pub fn tenant_filters(tables: &[Table], tenant_id: &str) -> Vec<TableFilter> {
    tables
        .iter()
        .map(|&table| TableFilter::for_tenant(table, tenant_id))
        .collect()
}

/// Messages sent from a device to the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedRequest {
    /// Open (or replace) the connection's subscription.
    Subscribe {
        tenant_id: TenantId,
        filters: Vec<TableFilter>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from the feed to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Subscription accepted.
    Subscribed { tenant_id: TenantId, tables: usize },

    /// A matching row change.
    Change(ChangeEvent),

    /// Response to ping.
    Pong,

    /// Error message.
    Error { message: String },
}

impl FeedMessage {
    pub fn error(message: impl Into<String>) -> Self {
        FeedMessage::Error {
            message: message.into(),
        }
    }
}
