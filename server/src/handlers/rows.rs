//! Row API handlers.
//!
//! Incoming rows are decoded with the engine's table adapters before they
//! touch the database, so a row that the devices could not read back is never
//! stored. Every committed change is published on the change feed.

use serde::Deserialize;
use serde_json::Value;
use tabsync_engine::{AdapterRegistry, ChangeEvent, Error, EventType, RecordKey, Table};

use crate::db::{self, Pool, RowWrite};
use crate::error::{AppError, Result};
use crate::websocket::ConnectionManager;

/// `?column=&value=` selector of the bulk endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnQuery {
    pub column: String,
    pub value: String,
}

impl ColumnQuery {
    fn validate(&self) -> Result<()> {
        if self.column.is_empty() {
            return Err(AppError::BadRequest("column must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Decode rows of `table` and check they all belong to `tenant_id`.
pub fn validate_rows(
    registry: &AdapterRegistry,
    table: Table,
    tenant_id: &str,
    rows: Vec<Value>,
) -> Result<Vec<RowWrite>> {
    let adapter = registry.get(table)?;
    rows.into_iter()
        .map(|data| {
            let record = adapter.from_wire(&data)?;
            if record.tenant_id != tenant_id {
                return Err(Error::TenantMismatch {
                    expected: tenant_id.to_string(),
                    actual: record.tenant_id,
                }
                .into());
            }
            Ok(RowWrite {
                row_key: record.key.encode(),
                updated_at: record.updated_at,
                data,
            })
        })
        .collect()
}

/// Upsert rows and publish INSERT/UPDATE events.
pub async fn handle_upsert(
    pool: &Pool,
    registry: &AdapterRegistry,
    feed: &ConnectionManager,
    table: Table,
    tenant_id: &str,
    rows: Vec<Value>,
) -> Result<usize> {
    let writes = validate_rows(registry, table, tenant_id, rows)?;
    if writes.is_empty() {
        return Ok(0);
    }

    let written = db::upsert_rows(pool, table, tenant_id, writes).await?;
    tracing::debug!(table = %table, tenant = %tenant_id, rows = written.len(), "rows upserted");

    for row in &written {
        let event_type = if row.inserted {
            EventType::Insert
        } else {
            EventType::Update
        };
        feed.broadcast(&ChangeEvent::upsert(table, event_type, row.data.clone()));
    }
    Ok(written.len())
}

/// Delete one row by its encoded key and publish a DELETE event.
///
/// Deleting a missing row succeeds so that retried deletes stay idempotent.
pub async fn handle_delete(
    pool: &Pool,
    feed: &ConnectionManager,
    table: Table,
    tenant_id: &str,
    key: &str,
) -> Result<bool> {
    let key = RecordKey::decode(table, key)?.encode();
    match db::delete_row(pool, table, tenant_id, &key).await? {
        Some(old) => {
            tracing::debug!(table = %table, tenant = %tenant_id, key = %key, "row deleted");
            feed.broadcast(&ChangeEvent::delete(table, old));
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Delete every row matching a column selector and publish DELETE events.
pub async fn handle_delete_where(
    pool: &Pool,
    feed: &ConnectionManager,
    table: Table,
    tenant_id: &str,
    query: &ColumnQuery,
) -> Result<usize> {
    query.validate()?;
    let deleted = db::delete_where(pool, table, tenant_id, &query.column, &query.value).await?;
    tracing::debug!(
        table = %table,
        tenant = %tenant_id,
        column = %query.column,
        rows = deleted.len(),
        "rows deleted"
    );

    for old in &deleted {
        feed.broadcast(&ChangeEvent::delete(table, old.clone()));
    }
    Ok(deleted.len())
}

/// Rows matching a column selector.
pub async fn handle_select(
    pool: &Pool,
    table: Table,
    tenant_id: &str,
    query: &ColumnQuery,
) -> Result<Vec<Value>> {
    query.validate()?;
    let rows = db::select_where(pool, table, tenant_id, &query.column, &query.value).await?;
    Ok(rows)
}
