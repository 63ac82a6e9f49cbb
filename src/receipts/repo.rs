use anyhow::Context;
use axum::async_trait;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{ExtractionOutcome, NewReceipt, Receipt, ReceiptRow, ReceiptStatus};
use crate::{db::PgStore, error::ApiResult, validation::DateRange};

#[async_trait]
pub trait ReceiptRepo: Send + Sync {
    /// Holds an exclusive lock on `file_key` until the returned unit of work
    /// is committed or dropped. Storing or removing the artifact and the rows
    /// that reference it happens under this lock, in every process.
    async fn lock_artifact(&self, file_key: &str) -> ApiResult<Box<dyn ArtifactTx>>;
    async fn record_extraction(
        &self,
        user_id: Uuid,
        id: i64,
        outcome: &ExtractionOutcome,
    ) -> ApiResult<Option<Receipt>>;
    async fn get(&self, user_id: Uuid, id: i64) -> ApiResult<Option<Receipt>>;
    /// Newest first.
    async fn list(&self, user_id: Uuid) -> ApiResult<Vec<Receipt>>;
    async fn set_expense(
        &self,
        user_id: Uuid,
        id: i64,
        expense_id: Option<i64>,
    ) -> ApiResult<Option<Receipt>>;
    /// Receipts of `user_id` uploaded on a day within `range` (UTC).
    async fn count_in_range(&self, user_id: Uuid, range: &DateRange) -> ApiResult<i64>;
}

/// Row changes made while one artifact key is locked. Dropping without
/// `commit` discards them.
#[async_trait]
pub trait ArtifactTx: Send {
    /// Inserts with status `pending`.
    async fn insert(&mut self, user_id: Uuid, receipt: &NewReceipt) -> ApiResult<Receipt>;
    /// Returns the removed row.
    async fn delete(&mut self, user_id: Uuid, id: i64) -> ApiResult<Option<Receipt>>;
    /// Receipts of any user still pointing at `file_key`.
    async fn count_by_key(&mut self, file_key: &str) -> ApiResult<i64>;
    async fn commit(self: Box<Self>) -> ApiResult<()>;
}

const COLUMNS: &str = "id, user_id, file_key, file_name, content_type, size_bytes, sha256, \
                       status, vendor, amount, receipt_date, expense_id, created_at, updated_at";

fn convert(row: ReceiptRow) -> ApiResult<Receipt> {
    let id = row.id;
    Ok(Receipt::try_from(row).with_context(|| format!("decode receipt {id}"))?)
}

fn convert_opt(row: Option<ReceiptRow>) -> ApiResult<Option<Receipt>> {
    row.map(convert).transpose()
}

#[async_trait]
impl ReceiptRepo for PgStore {
    async fn lock_artifact(&self, file_key: &str) -> ApiResult<Box<dyn ArtifactTx>> {
        let mut tx = self.pool.begin().await?;
        // Released by commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(file_key)
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgArtifactTx { tx }))
    }

    async fn record_extraction(
        &self,
        user_id: Uuid,
        id: i64,
        outcome: &ExtractionOutcome,
    ) -> ApiResult<Option<Receipt>> {
        let sql = format!(
            r#"
            UPDATE receipts
               SET status = $3, vendor = $4, amount = $5, receipt_date = $6, updated_at = now()
             WHERE id = $1 AND user_id = $2
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(outcome.status.as_str())
            .bind(&outcome.vendor)
            .bind(outcome.amount)
            .bind(outcome.receipt_date)
            .fetch_optional(&self.pool)
            .await?;
        convert_opt(row)
    }

    async fn get(&self, user_id: Uuid, id: i64) -> ApiResult<Option<Receipt>> {
        let sql = format!("SELECT {COLUMNS} FROM receipts WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        convert_opt(row)
    }

    async fn list(&self, user_id: Uuid) -> ApiResult<Vec<Receipt>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM receipts WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(convert).collect()
    }

    async fn set_expense(
        &self,
        user_id: Uuid,
        id: i64,
        expense_id: Option<i64>,
    ) -> ApiResult<Option<Receipt>> {
        let sql = format!(
            r#"
            UPDATE receipts
               SET expense_id = $3, updated_at = now()
             WHERE id = $1 AND user_id = $2
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(expense_id)
            .fetch_optional(&self.pool)
            .await?;
        convert_opt(row)
    }

    async fn count_in_range(&self, user_id: Uuid, range: &DateRange) -> ApiResult<i64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM receipts
             WHERE user_id = $1
               AND ($2::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date >= $2)
               AND ($3::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date <= $3)
            "#,
        )
        .bind(user_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}

pub struct PgArtifactTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ArtifactTx for PgArtifactTx {
    async fn insert(&mut self, user_id: Uuid, r: &NewReceipt) -> ApiResult<Receipt> {
        let sql = format!(
            r#"
            INSERT INTO receipts (user_id, file_key, file_name, content_type, size_bytes, sha256, status, expense_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(user_id)
            .bind(&r.file_key)
            .bind(&r.file_name)
            .bind(&r.content_type)
            .bind(r.size_bytes)
            .bind(&r.sha256)
            .bind(ReceiptStatus::Pending.as_str())
            .bind(r.expense_id)
            .fetch_one(&mut *self.tx)
            .await?;
        convert(row)
    }

    async fn delete(&mut self, user_id: Uuid, id: i64) -> ApiResult<Option<Receipt>> {
        let sql = format!("DELETE FROM receipts WHERE id = $1 AND user_id = $2 RETURNING {COLUMNS}");
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        convert_opt(row)
    }

    async fn count_by_key(&mut self, file_key: &str) -> ApiResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE file_key = $1")
            .bind(file_key)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(n)
    }

    async fn commit(self: Box<Self>) -> ApiResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
