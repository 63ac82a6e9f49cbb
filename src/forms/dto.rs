use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

#[derive(Debug, Default, Deserialize)]
pub struct FormParams {
    #[serde(alias = "start_date")]
    pub start: Option<String>,
    #[serde(alias = "end_date")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub total: Decimal,
    pub count: usize,
    /// Sorted by category name.
    pub by_category: Vec<CategoryTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormSummary {
    #[serde(with = "crate::serde_ext::iso_date::option")]
    pub start: Option<Date>,
    #[serde(with = "crate::serde_ext::iso_date::option")]
    pub end: Option<Date>,
    pub income: KindSummary,
    pub expense: KindSummary,
    /// Income total minus expense total.
    pub net: Decimal,
    pub receipt_count: i64,
}
