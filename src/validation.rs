use std::collections::BTreeMap;

use rust_decimal::Decimal;
use time::Date;

use crate::{
    error::{ApiResult, AppError},
    serde_ext::parse_date,
};

pub const CATEGORY_MAX: usize = 64;
pub const NOTE_MAX: usize = 500;

lazy_static::lazy_static! {
    // NUMERIC(14, 2)
    static ref AMOUNT_MAX: Decimal = Decimal::new(99_999_999_999_999, 2);
}

/// Collects per-field problems so a request reports all of them at once.
#[derive(Debug, Default)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, problem: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| problem.into());
    }

    /// Records the error of `res` under `field` and yields its value, if any.
    pub fn check<T>(&mut self, field: &str, res: Result<T, String>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(problem) => {
                self.add(field, problem);
                None
            }
        }
    }

    pub fn finish(self) -> ApiResult<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        let message = self
            .0
            .iter()
            .map(|(f, p)| format!("{f}: {p}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(AppError::InvalidInput {
            message,
            fields: self.0,
        })
    }
}

/// Non-negative, at most two fractional digits; returned rescaled to two.
pub fn amount(value: Decimal) -> Result<Decimal, String> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err("must be non-negative".into());
    }
    if value.normalize().scale() > 2 {
        return Err("must have at most 2 decimal places".into());
    }
    if value > *AMOUNT_MAX {
        return Err("is too large".into());
    }
    let mut v = value.abs();
    v.rescale(2);
    Ok(v)
}

pub fn category(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("must not be empty".into());
    }
    if trimmed.chars().count() > CATEGORY_MAX {
        return Err(format!("must be at most {CATEGORY_MAX} characters"));
    }
    Ok(trimmed.to_string())
}

/// Blank notes collapse to `None`.
pub fn note(value: Option<&str>) -> Result<Option<String>, String> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) if s.chars().count() > NOTE_MAX => {
            Err(format!("must be at most {NOTE_MAX} characters"))
        }
        Some(s) => Ok(Some(s.to_string())),
    }
}

pub fn date(value: &str) -> Result<Date, String> {
    parse_date(value).ok_or_else(|| "must be a valid YYYY-MM-DD date".to_string())
}

/// Inclusive date range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<Date>,
    pub end: Option<Date>,
}

impl DateRange {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> ApiResult<Self> {
        let mut errs = FieldErrors::default();
        let start = start
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| errs.check("start", date(s)));
        let end = end
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| errs.check("end", date(s)));
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                errs.add("start", "must not be after end");
            }
        }
        errs.finish()?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, d: Date) -> bool {
        self.start.map_or(true, |s| d >= s) && self.end.map_or(true, |e| d <= e)
    }
}
