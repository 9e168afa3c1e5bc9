//! SQLite-backed local store.

use super::LocalStore;
use crate::db::Pool;
use crate::{Result, TenantContext};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tabsync_engine::{Record, RecordKey, SyncStatus, Table};

/// A stored record row from the database.
#[derive(Debug)]
struct StoredRecord {
    table_name: String,
    tenant_id: String,
    record_key: String,
    sync_status: String,
    updated_at: i64,
    fields: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            table_name: row.try_get("table_name")?,
            tenant_id: row.try_get("tenant_id")?,
            record_key: row.try_get("record_key")?,
            sync_status: row.try_get("sync_status")?,
            updated_at: row.try_get("updated_at")?,
            fields: row.try_get("fields")?,
        })
    }
}

impl StoredRecord {
    fn into_record(self) -> Result<Record> {
        let table: Table = self.table_name.parse()?;
        Ok(Record {
            key: RecordKey::decode(table, &self.record_key)?,
            table,
            tenant_id: self.tenant_id,
            sync_status: self.sync_status.parse()?,
            updated_at: self.updated_at,
            fields: serde_json::from_str(&self.fields)?,
        })
    }
}

/// Local store persisted in the `records` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get_by_id(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<Option<Record>> {
        let row: Option<StoredRecord> = sqlx::query_as(
            r#"
            SELECT table_name, tenant_id, record_key, sync_status, updated_at, fields
            FROM records
            WHERE table_name = ? AND tenant_id = ? AND record_key = ?
            "#,
        )
        .bind(table.as_str())
        .bind(ctx.tenant_id())
        .bind(key.encode())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredRecord::into_record).transpose()
    }

    async fn upsert(&self, ctx: &TenantContext, record: &Record) -> Result<()> {
        ctx.check(record)?;
        let fields = serde_json::to_string(&record.fields)?;

        sqlx::query(
            r#"
            INSERT INTO records (table_name, tenant_id, record_key, sync_status, updated_at, fields)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (table_name, tenant_id, record_key) DO UPDATE SET
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at,
                fields = excluded.fields
            "#,
        )
        .bind(record.table.as_str())
        .bind(&record.tenant_id)
        .bind(record.key.encode())
        .bind(record.sync_status.as_str())
        .bind(record.updated_at)
        .bind(fields)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_by_id(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM records WHERE table_name = ? AND tenant_id = ? AND record_key = ?",
        )
        .bind(table.as_str())
        .bind(ctx.tenant_id())
        .bind(key.encode())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn replace_if_unchanged(&self, ctx: &TenantContext, expected: &Record, next: &Record) -> Result<bool> {
        ctx.check(next)?;
        // Fields serialize deterministically, so equal records store equal text.
        let expected_fields = serde_json::to_string(&expected.fields)?;
        let next_fields = serde_json::to_string(&next.fields)?;

        let result = sqlx::query(
            r#"
            UPDATE records SET sync_status = ?, updated_at = ?, fields = ?
            WHERE table_name = ? AND tenant_id = ? AND record_key = ?
              AND sync_status = ? AND updated_at = ? AND fields = ?
            "#,
        )
        .bind(next.sync_status.as_str())
        .bind(next.updated_at)
        .bind(next_fields)
        .bind(expected.table.as_str())
        .bind(ctx.tenant_id())
        .bind(expected.key.encode())
        .bind(expected.sync_status.as_str())
        .bind(expected.updated_at)
        .bind(expected_fields)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(
        &self,
        ctx: &TenantContext,
        table: Table,
        key: &RecordKey,
        status: SyncStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE records SET sync_status = ?
            WHERE table_name = ? AND tenant_id = ? AND record_key = ?
            "#,
        )
        .bind(status.as_str())
        .bind(table.as_str())
        .bind(ctx.tenant_id())
        .bind(key.encode())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn children(
        &self,
        ctx: &TenantContext,
        table: Table,
        parent_field: &str,
        parent_id: &str,
    ) -> Result<Vec<Record>> {
        let rows: Vec<StoredRecord> = sqlx::query_as(
            r#"
            SELECT table_name, tenant_id, record_key, sync_status, updated_at, fields
            FROM records
            WHERE table_name = ? AND tenant_id = ? AND json_extract(fields, ?) = ?
            ORDER BY record_key
            "#,
        )
        .bind(table.as_str())
        .bind(ctx.tenant_id())
        .bind(format!("$.{parent_field}"))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredRecord::into_record).collect()
    }

    async fn list(&self, ctx: &TenantContext, table: Table) -> Result<Vec<Record>> {
        let rows: Vec<StoredRecord> = sqlx::query_as(
            r#"
            SELECT table_name, tenant_id, record_key, sync_status, updated_at, fields
            FROM records
            WHERE table_name = ? AND tenant_id = ?
            ORDER BY record_key
            "#,
        )
        .bind(table.as_str())
        .bind(ctx.tenant_id())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredRecord::into_record).collect()
    }
}
