use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use time::{Date, Month};

use crate::validation;

/// Structured fields pulled out of a receipt artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub vendor: Option<String>,
    pub amount: Decimal,
    pub date: Option<Date>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("artifact is not a text receipt ({0})")]
    NotText(String),
    #[error("no total amount found")]
    NoTotal,
    #[error("total {total} rejected: {problem}")]
    BadTotal { total: String, problem: String },
}

pub trait ReceiptExtractor: Send + Sync {
    fn extract(&self, content_type: &str, bytes: &[u8]) -> Result<ExtractedFields, ExtractionError>;
}

const VENDOR_MAX: usize = 120;

lazy_static! {
    static ref TOTAL_RE: Regex = Regex::new(
        r"(?i)\b(?:grand\s+total|total|amount\s+due|balance\s+due)\b[^0-9\n]*?(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)"
    )
    .unwrap();
    static ref ISO_DATE_RE: Regex = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();
    static ref DMY_DATE_RE: Regex = Regex::new(r"\b(\d{2})/(\d{2})/(\d{4})\b").unwrap();
}

/// Reads plain-text (or already OCR'd) receipts. Binary formats are reported
/// as [`ExtractionError::NotText`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TextReceiptExtractor;

impl ReceiptExtractor for TextReceiptExtractor {
    fn extract(&self, content_type: &str, bytes: &[u8]) -> Result<ExtractedFields, ExtractionError> {
        let textual_type = content_type.starts_with("text/")
            || content_type == "application/octet-stream"
            || content_type.is_empty();
        if !textual_type {
            return Err(ExtractionError::NotText(content_type.to_string()));
        }
        let text = std::str::from_utf8(bytes)
            .ok()
            .filter(|t| !t.contains('\0'))
            .ok_or_else(|| ExtractionError::NotText("invalid utf-8".into()))?;

        let total = find_total(text).ok_or(ExtractionError::NoTotal)?;
        // Same bounds as ledger rows: NUMERIC(14, 2), non-negative.
        let amount = Decimal::from_str(&total.replace(',', ""))
            .map_err(|e| e.to_string())
            .and_then(validation::amount)
            .map_err(|problem| ExtractionError::BadTotal {
                total: total.to_string(),
                problem,
            })?;
        Ok(ExtractedFields {
            vendor: find_vendor(text),
            amount,
            date: find_date(text),
        })
    }
}

/// Last total-like figure as written; figures with cents win over bare
/// integers ("Total items: 3" vs "TOTAL 12.40").
fn find_total(text: &str) -> Option<&str> {
    let candidates: Vec<&str> = TOTAL_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    candidates
        .iter()
        .rev()
        .find(|c| c.contains('.'))
        .or_else(|| candidates.last())
        .copied()
}

fn find_date(text: &str) -> Option<Date> {
    let iso = ISO_DATE_RE.captures_iter(text).find_map(|c| {
        ymd(c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3)?.as_str())
    });
    iso.or_else(|| {
        DMY_DATE_RE.captures_iter(text).find_map(|c| {
            ymd(c.get(3)?.as_str(), c.get(2)?.as_str(), c.get(1)?.as_str())
        })
    })
}

fn ymd(y: &str, m: &str, d: &str) -> Option<Date> {
    let month = Month::try_from(m.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(y.parse().ok()?, month, d.parse().ok()?).ok()
}

/// First non-empty line that is not purely numeric. Digits with date, time
/// or price punctuation ("2024-01-05 14:02", "$12.00") count as numeric.
fn find_vendor(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_numeric_line(l))
        .map(|l| l.chars().take(VENDOR_MAX).collect())
}

fn is_numeric_line(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || "-/:.,$#+()".contains(c))
}
