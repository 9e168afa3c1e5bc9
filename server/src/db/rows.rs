//! Database operations for the `rows` table.
//!
//! Every synced table shares one Postgres table; a row is addressed by
//! `(table_name, tenant_id, row_key)` and its wire form is kept as JSONB.
//! Writes return what they changed so the caller can publish change events.

use serde_json::Value;
use sqlx::{PgPool, Row};
use tabsync_engine::Table;

/// A validated row ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    pub row_key: String,
    pub updated_at: i64,
    pub data: Value,
}

/// Result of upserting one row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertedRow {
    pub inserted: bool,
    pub data: Value,
}

/// Upsert rows of one tenant in a single transaction.
pub async fn upsert_rows(
    pool: &PgPool,
    table: Table,
    tenant_id: &str,
    rows: Vec<RowWrite>,
) -> Result<Vec<UpsertedRow>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut written = Vec::with_capacity(rows.len());

    for row in rows {
        // xmax is zero only for a freshly inserted tuple
        let inserted: bool = sqlx::query(
            r#"
            INSERT INTO rows (table_name, tenant_id, row_key, data, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (table_name, tenant_id, row_key) DO UPDATE SET
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(table.as_str())
        .bind(tenant_id)
        .bind(&row.row_key)
        .bind(&row.data)
        .bind(row.updated_at)
        .fetch_one(&mut *tx)
        .await?
        .try_get("inserted")?;

        written.push(UpsertedRow {
            inserted,
            data: row.data,
        });
    }

    tx.commit().await?;
    Ok(written)
}

/// Delete one row, returning its last data if it existed.
pub async fn delete_row(
    pool: &PgPool,
    table: Table,
    tenant_id: &str,
    row_key: &str,
) -> Result<Option<Value>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        DELETE FROM rows
        WHERE table_name = $1 AND tenant_id = $2 AND row_key = $3
        RETURNING data
        "#,
    )
    .bind(table.as_str())
    .bind(tenant_id)
    .bind(row_key)
    .fetch_optional(pool)
    .await
}

/// Delete a tenant's rows whose `column` equals `value`, returning their data.
pub async fn delete_where(
    pool: &PgPool,
    table: Table,
    tenant_id: &str,
    column: &str,
    value: &str,
) -> Result<Vec<Value>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        DELETE FROM rows
        WHERE table_name = $1 AND tenant_id = $2 AND data ->> $3 = $4
        RETURNING data
        "#,
    )
    .bind(table.as_str())
    .bind(tenant_id)
    .bind(column)
    .bind(value)
    .fetch_all(pool)
    .await
}

/// A tenant's rows whose `column` equals `value`, oldest first.
pub async fn select_where(
    pool: &PgPool,
    table: Table,
    tenant_id: &str,
    column: &str,
    value: &str,
) -> Result<Vec<Value>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT data FROM rows
        WHERE table_name = $1 AND tenant_id = $2 AND data ->> $3 = $4
        ORDER BY updated_at, row_key
        "#,
    )
    .bind(table.as_str())
    .bind(tenant_id)
    .bind(column)
    .bind(value)
    .fetch_all(pool)
    .await
}
