use axum::async_trait;
use uuid::Uuid;

use crate::{auth::repo_types::User, db::PgStore, error::ApiResult};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_username(&self, username: &str) -> ApiResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<User>>;
    /// Fails with `Conflict` when the username is taken.
    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> ApiResult<User>;
}

#[async_trait]
impl UserRepo for PgStore {
    async fn find_by_username(&self, username: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, display_name, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, display_name, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> ApiResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password_hash, display_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, display_name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }
}
