use std::{collections::HashSet, time::Duration};

use anyhow::Context;
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::AppConfig;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL-backed repositories share this handle; the pool is the only
/// connection state in the process.
#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("connect to database")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR.run(pool).await.context("apply migrations")?;
    info!(count = MIGRATOR.iter().count(), "migrations applied");
    Ok(())
}

/// Fails unless every embedded migration has been applied successfully.
pub async fn verify_schema(pool: &PgPool) -> anyhow::Result<()> {
    let applied: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = TRUE")
            .fetch_all(pool)
            .await
            .context("read migration history (run `pennywise migrate` first)")?;

    let missing = pending_versions(MIGRATOR.iter().map(|m| m.version), &applied);
    anyhow::ensure!(
        missing.is_empty(),
        "database schema is behind: pending migrations {missing:?} (run `pennywise migrate`)"
    );
    info!(versions = applied.len(), "schema verified");
    Ok(())
}

fn pending_versions(embedded: impl Iterator<Item = i64>, applied: &[i64]) -> Vec<i64> {
    let applied: HashSet<i64> = applied.iter().copied().collect();
    embedded.filter(|v| !applied.contains(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_versions_lists_unapplied() {
        let missing = pending_versions([1, 2, 3].into_iter(), &[1, 3]);
        assert_eq!(missing, vec![2]);
        assert!(pending_versions([1].into_iter(), &[1, 7]).is_empty());
    }

    #[test]
    fn embedded_migrations_are_present() {
        assert!(MIGRATOR.iter().count() >= 1);
    }
}
