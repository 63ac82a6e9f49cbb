use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// An income or expense row; both tables share this shape.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Entry {
    pub id: i64,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub category: String,
    #[serde(with = "crate::serde_ext::iso_date")]
    pub date: Date,
    pub note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Validated fields of a new row.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub amount: Decimal,
    pub category: String,
    pub date: Date,
    pub note: Option<String>,
}

/// Validated partial update; `None` leaves a column unchanged and
/// `note: Some(None)` clears the note.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub date: Option<Date>,
    pub note: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub start: Option<Date>,
    pub end: Option<Date>,
    pub category: Option<String>,
    /// `None` returns every matching row.
    pub limit: Option<i64>,
    pub offset: i64,
}
