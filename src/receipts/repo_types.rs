use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Processed,
    ExtractionFailed,
}

impl ReceiptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Processed => "processed",
            ReceiptStatus::ExtractionFailed => "extraction_failed",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiptStatus::Pending),
            "processed" => Ok(ReceiptStatus::Processed),
            "extraction_failed" => Ok(ReceiptStatus::ExtractionFailed),
            other => anyhow::bail!("unknown receipt status {other:?}"),
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ReceiptRow {
    pub id: i64,
    pub user_id: Uuid,
    pub file_key: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub status: String,
    pub vendor: Option<String>,
    pub amount: Option<Decimal>,
    pub receipt_date: Option<Date>,
    pub expense_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub id: i64,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub file_key: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub status: ReceiptStatus,
    pub vendor: Option<String>,
    pub amount: Option<Decimal>,
    #[serde(with = "crate::serde_ext::iso_date::option")]
    pub receipt_date: Option<Date>,
    pub expense_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<ReceiptRow> for Receipt {
    type Error = anyhow::Error;

    fn try_from(r: ReceiptRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            file_key: r.file_key,
            file_name: r.file_name,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            sha256: r.sha256,
            status: r.status.parse()?,
            vendor: r.vendor,
            amount: r.amount,
            receipt_date: r.receipt_date,
            expense_id: r.expense_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Row written at upload time; extraction results are recorded afterwards.
#[derive(Debug, Clone)]
pub struct NewReceipt {
    pub file_key: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub expense_id: Option<i64>,
}

/// Outcome of one extraction run. Fields are `None` on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub status: ReceiptStatus,
    pub vendor: Option<String>,
    pub amount: Option<Decimal>,
    pub receipt_date: Option<Date>,
}
