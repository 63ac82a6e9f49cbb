use std::{path::PathBuf, str::FromStr};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Either every value is allowed (`*`) or only the listed ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum AllowList {
    Any,
    Only(Vec<String>),
}

impl AllowList {
    pub fn parse(raw: &str) -> Self {
        let items: Vec<String> = raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if items.is_empty() || items.iter().any(|s| s == "*") {
            AllowList::Any
        } else {
            AllowList::Only(items)
        }
    }

    pub fn allows(&self, value: &str) -> bool {
        match self {
            AllowList::Any => true,
            AllowList::Only(items) => items.iter().any(|s| s == value),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allow_origins: AllowList,
    pub allow_credentials: bool,
    pub allow_methods: AllowList,
    pub allow_headers: AllowList,
}

#[derive(Debug, Clone, Deserialize)]
pub enum StorageConfig {
    Fs {
        root: PathBuf,
    },
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        region: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub receipt_max_bytes: usize,
    pub run_migrations: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "pennywise".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "pennywise-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60)?,
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let cors = CorsConfig {
            allow_origins: AllowList::parse(&env_str("CORS_ALLOW_ORIGINS", "*")),
            allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true)?,
            allow_methods: AllowList::parse(&env_str("CORS_ALLOW_METHODS", "*")),
            allow_headers: AllowList::parse(&env_str("CORS_ALLOW_HEADERS", "*")),
        };
        let storage = match env_str("STORAGE_BACKEND", "fs").as_str() {
            "fs" => StorageConfig::Fs {
                root: PathBuf::from(env_str("STORAGE_DIR", "./data/receipts")),
            },
            "s3" => StorageConfig::S3 {
                endpoint: std::env::var("S3_ENDPOINT").context("S3_ENDPOINT must be set")?,
                bucket: std::env::var("S3_BUCKET").context("S3_BUCKET must be set")?,
                access_key: std::env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY must be set")?,
                secret_key: std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY must be set")?,
                region: env_str("S3_REGION", "us-east-1"),
            },
            other => anyhow::bail!("unknown STORAGE_BACKEND {other:?} (expected fs or s3)"),
        };

        Ok(Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            host: env_str("APP_HOST", "0.0.0.0"),
            port: env_or("APP_PORT", 8000)?,
            jwt,
            cors,
            storage,
            receipt_max_bytes: env_or("RECEIPT_MAX_BYTES", 10 * 1024 * 1024)?,
            run_migrations: env_or("RUN_MIGRATIONS", false)?,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses `key` if set; a present but malformed value is an error rather than
/// a silent fallback.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
