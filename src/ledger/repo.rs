use axum::async_trait;
use uuid::Uuid;

use super::{
    repo_types::{Entry, EntryFilter, EntryPatch, NewEntry},
    EntryKind,
};
use crate::{db::PgStore, error::ApiResult};

/// Owner-scoped access to the `incomes` and `expenses` tables. Every method
/// filters on `user_id`, so rows of other users behave as absent.
#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn insert(&self, kind: EntryKind, user_id: Uuid, entry: &NewEntry) -> ApiResult<Entry>;
    /// Ordered by date, then id, both descending.
    async fn list(&self, kind: EntryKind, user_id: Uuid, filter: &EntryFilter)
        -> ApiResult<Vec<Entry>>;
    async fn get(&self, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<Option<Entry>>;
    async fn update(
        &self,
        kind: EntryKind,
        user_id: Uuid,
        id: i64,
        patch: &EntryPatch,
    ) -> ApiResult<Option<Entry>>;
    /// `false` when no owned row had this id.
    async fn delete(&self, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<bool>;
}

const COLUMNS: &str = "id, user_id, amount, category, date, note, created_at, updated_at";

#[async_trait]
impl LedgerRepo for PgStore {
    async fn insert(&self, kind: EntryKind, user_id: Uuid, entry: &NewEntry) -> ApiResult<Entry> {
        let sql = format!(
            r#"
            INSERT INTO {table} (user_id, amount, category, date, note)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "#,
            table = kind.table()
        );
        let row = sqlx::query_as::<_, Entry>(&sql)
            .bind(user_id)
            .bind(entry.amount)
            .bind(&entry.category)
            .bind(entry.date)
            .bind(&entry.note)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list(
        &self,
        kind: EntryKind,
        user_id: Uuid,
        filter: &EntryFilter,
    ) -> ApiResult<Vec<Entry>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM {table}
            WHERE user_id = $1
              AND ($2::date IS NULL OR date >= $2)
              AND ($3::date IS NULL OR date <= $3)
              AND ($4::text IS NULL OR lower(category) = lower($4))
            ORDER BY date DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
            table = kind.table()
        );
        let rows = sqlx::query_as::<_, Entry>(&sql)
            .bind(user_id)
            .bind(filter.start)
            .bind(filter.end)
            .bind(filter.category.as_deref())
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get(&self, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<Option<Entry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE id = $1 AND user_id = $2",
            table = kind.table()
        );
        let row = sqlx::query_as::<_, Entry>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(
        &self,
        kind: EntryKind,
        user_id: Uuid,
        id: i64,
        patch: &EntryPatch,
    ) -> ApiResult<Option<Entry>> {
        // One statement, so concurrent edits of the same row serialize on its lock.
        let sql = format!(
            r#"
            UPDATE {table}
               SET amount     = COALESCE($3, amount),
                   category   = COALESCE($4, category),
                   date       = COALESCE($5, date),
                   note       = CASE WHEN $6 THEN $7 ELSE note END,
                   updated_at = now()
             WHERE id = $1 AND user_id = $2
            RETURNING {COLUMNS}
            "#,
            table = kind.table()
        );
        let row = sqlx::query_as::<_, Entry>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(patch.amount)
            .bind(patch.category.as_deref())
            .bind(patch.date)
            .bind(patch.note.is_some())
            .bind(patch.note.clone().flatten())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete(&self, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<bool> {
        let sql = format!(
            "DELETE FROM {table} WHERE id = $1 AND user_id = $2",
            table = kind.table()
        );
        let done = sqlx::query(&sql)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }
}
