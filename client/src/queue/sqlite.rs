//! SQLite-backed mutation queue.

use super::MutationQueue;
use crate::db::Pool;
use crate::{Result, TenantContext};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tabsync_engine::{MutationQueueEntry, NewMutation, SequenceId, Table};

/// A queue row from the database.
#[derive(Debug)]
struct StoredEntry {
    sequence_id: i64,
    tenant_id: String,
    table_name: String,
    record_id: String,
    operation: String,
    payload: String,
    created_at: i64,
    retry_count: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntry {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredEntry {
            sequence_id: row.try_get("sequence_id")?,
            tenant_id: row.try_get("tenant_id")?,
            table_name: row.try_get("table_name")?,
            record_id: row.try_get("record_id")?,
            operation: row.try_get("operation")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            retry_count: row.try_get("retry_count")?,
        })
    }
}

impl StoredEntry {
    fn into_entry(self) -> Result<MutationQueueEntry> {
        Ok(MutationQueueEntry {
            sequence_id: self.sequence_id,
            tenant_id: self.tenant_id,
            table: self.table_name.parse()?,
            record_id: self.record_id,
            operation: self.operation.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
        })
    }
}

const SELECT_ENTRIES: &str = r#"
    SELECT sequence_id, tenant_id, table_name, record_id, operation, payload, created_at, retry_count
    FROM mutation_queue
"#;

/// Mutation queue persisted in the `mutation_queue` table.
///
/// Sequence ids come from `AUTOINCREMENT`, so they never repeat even after
/// the newest entry was acked.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: Pool,
}

impl SqliteQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MutationQueue for SqliteQueue {
    async fn enqueue(&self, mutation: NewMutation) -> Result<SequenceId> {
        let payload = serde_json::to_string(&mutation.payload)?;
        let result = sqlx::query(
            r#"
            INSERT INTO mutation_queue (tenant_id, table_name, record_id, operation, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&mutation.tenant_id)
        .bind(mutation.table.as_str())
        .bind(&mutation.record_id)
        .bind(mutation.operation.as_str())
        .bind(payload)
        .bind(mutation.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn dequeue_batch_after(
        &self,
        ctx: &TenantContext,
        after: SequenceId,
        limit: usize,
    ) -> Result<Vec<MutationQueueEntry>> {
        let rows: Vec<StoredEntry> = sqlx::query_as(&format!(
            "{SELECT_ENTRIES} WHERE tenant_id = ? AND sequence_id > ? ORDER BY sequence_id LIMIT ?"
        ))
        .bind(ctx.tenant_id())
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredEntry::into_entry).collect()
    }

    async fn latest_for(&self, ctx: &TenantContext, table: Table, record_id: &str) -> Result<Option<MutationQueueEntry>> {
        let row: Option<StoredEntry> = sqlx::query_as(&format!(
            "{SELECT_ENTRIES} WHERE tenant_id = ? AND table_name = ? AND record_id = ? \
             ORDER BY sequence_id DESC LIMIT 1"
        ))
        .bind(ctx.tenant_id())
        .bind(table.as_str())
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredEntry::into_entry).transpose()
    }

    async fn ack(&self, sequence_id: SequenceId) -> Result<()> {
        sqlx::query("DELETE FROM mutation_queue WHERE sequence_id = ?")
            .bind(sequence_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_retry(&self, sequence_id: SequenceId) -> Result<()> {
        sqlx::query("UPDATE mutation_queue SET retry_count = retry_count + 1 WHERE sequence_id = ?")
            .bind(sequence_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prune_exhausted(&self, ctx: &TenantContext, max_retries: u32) -> Result<Vec<MutationQueueEntry>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<StoredEntry> = sqlx::query_as(&format!(
            "{SELECT_ENTRIES} WHERE tenant_id = ? AND retry_count >= ? ORDER BY sequence_id"
        ))
        .bind(ctx.tenant_id())
        .bind(i64::from(max_retries))
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM mutation_queue WHERE tenant_id = ? AND retry_count >= ?")
            .bind(ctx.tenant_id())
            .bind(i64::from(max_retries))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        rows.into_iter().map(StoredEntry::into_entry).collect()
    }

    async fn len(&self, ctx: &TenantContext) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mutation_queue WHERE tenant_id = ?")
            .bind(ctx.tenant_id())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::queue::contract;

    async fn queue() -> SqliteQueue {
        SqliteQueue::new(db::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn fifo_batches() {
        contract::fifo_batches(&queue().await).await;
    }

    #[tokio::test]
    async fn ack_retry_prune() {
        contract::ack_retry_prune(&queue().await).await;
    }

    #[tokio::test]
    async fn paging_and_latest() {
        contract::paging_and_latest(&queue().await).await;
    }

    #[tokio::test]
    async fn sequence_survives_ack_of_newest() {
        let queue = queue().await;
        let ctx = TenantContext::new("t1");
        let mutation = |id: &str| {
            NewMutation::new(
                "t1",
                tabsync_engine::Table::Vendors,
                &tabsync_engine::RecordKey::id(id),
                tabsync_engine::Operation::Insert,
                serde_json::json!({}),
                1,
            )
        };

        let first = queue.enqueue(mutation("a")).await.unwrap();
        queue.ack(first).await.unwrap();
        let second = queue.enqueue(mutation("b")).await.unwrap();
        assert!(second > first);
        assert_eq!(queue.len(&ctx).await.unwrap(), 1);
    }
}
