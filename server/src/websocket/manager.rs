//! WebSocket connection manager.
//!
//! Tracks feed connections and their subscriptions, and fans row changes out
//! to the connections whose filters match.

use std::sync::Arc;

use dashmap::DashMap;
use tabsync_engine::{ChangeEvent, FeedMessage, TableFilter};
use tokio::sync::mpsc;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<FeedMessage>;

/// A single feed connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Tenant the connection was opened for
    pub tenant_id: String,
    /// Active filters; empty until the client subscribes
    pub filters: Vec<TableFilter>,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Why a subscription was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubscribeError {
    #[error("unknown connection {0}")]
    UnknownConnection(String),

    #[error("connection belongs to tenant {expected}, not {actual}")]
    TenantMismatch { expected: String, actual: String },

    #[error("filter {column}={value} on {table} is not scoped to the tenant")]
    ForeignFilter {
        table: String,
        column: String,
        value: String,
    },
}

/// Manages active feed connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
    /// Index of connections by tenant for counting and cleanup.
    by_tenant: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection of `tenant_id`.
    ///
    /// Returns the connection ID.
    pub fn register(&self, tenant_id: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                tenant_id: tenant_id.clone(),
                filters: Vec::new(),
                sender,
            },
        );
        self.by_tenant
            .entry(tenant_id.clone())
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, tenant = %tenant_id, "feed connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_tenant.get_mut(&conn.tenant_id) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_tenant.remove(&conn.tenant_id);
                }
            }

            tracing::info!(conn_id = %conn_id, tenant = %conn.tenant_id, "feed connection unregistered");
        }
    }

    /// Replace a connection's filters.
    ///
    /// Every filter must be the tenant filter of its table for the
    /// connection's own tenant. Returns the number of subscribed tables.
    pub fn subscribe(
        &self,
        conn_id: &str,
        tenant_id: &str,
        filters: Vec<TableFilter>,
    ) -> Result<usize, SubscribeError> {
        let mut conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| SubscribeError::UnknownConnection(conn_id.to_string()))?;

        if conn.tenant_id != tenant_id {
            return Err(SubscribeError::TenantMismatch {
                expected: conn.tenant_id.clone(),
                actual: tenant_id.to_string(),
            });
        }
        if let Some(foreign) = filters
            .iter()
            .find(|f| **f != TableFilter::for_tenant(f.table, tenant_id))
        {
            return Err(SubscribeError::ForeignFilter {
                table: foreign.table.to_string(),
                column: foreign.column.clone(),
                value: foreign.value.clone(),
            });
        }

        conn.filters = filters;
        tracing::debug!(conn_id = %conn_id, tables = conn.filters.len(), "feed subscription updated");
        Ok(conn.filters.len())
    }

    /// Forward a change to every connection with a matching filter.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.filters.iter().any(|f| f.matches(event))
                && conn.sender.send(FeedMessage::Change(event.clone())).is_ok()
            {
                sent_count += 1;
            }
        }

        tracing::debug!(
            table = %event.table,
            event_type = ?event.event_type,
            recipients = sent_count,
            "broadcast change"
        );

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: FeedMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of tenants with at least one connection.
    pub fn tenant_count(&self) -> usize {
        self.by_tenant.len()
    }
}
