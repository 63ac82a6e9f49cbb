use rust_decimal::Decimal;
use serde::Deserialize;

use crate::serde_ext::double_option;

/// Body of `POST /income` and `POST /expense`. The aliases are the field
/// names the mobile client sends.
#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    #[serde(alias = "total")]
    pub amount: Decimal,
    #[serde(alias = "income_category", alias = "expense_category")]
    pub category: String,
    pub date: String,
    #[serde(default, alias = "description")]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEntryRequest {
    #[serde(default, alias = "total")]
    pub amount: Option<Decimal>,
    #[serde(default, alias = "income_category", alias = "expense_category")]
    pub category: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "description", deserialize_with = "double_option")]
    pub note: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
