use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{CreateEntryRequest, ListParams, UpdateEntryRequest},
    repo_types::{Entry, EntryFilter, EntryPatch, NewEntry},
    EntryKind,
};
use crate::{
    error::{ApiResult, AppError},
    state::AppState,
    validation::{self, DateRange, FieldErrors},
};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

pub fn validate_new(req: CreateEntryRequest) -> ApiResult<NewEntry> {
    let mut errs = FieldErrors::default();
    let amount = errs.check("amount", validation::amount(req.amount));
    let category = errs.check("category", validation::category(&req.category));
    let date = errs.check("date", validation::date(&req.date));
    let note = errs.check("note", validation::note(req.note.as_deref()));
    errs.finish()?;

    match (amount, category, date, note) {
        (Some(amount), Some(category), Some(date), Some(note)) => Ok(NewEntry {
            amount,
            category,
            date,
            note,
        }),
        _ => Err(AppError::invalid("invalid entry")),
    }
}

pub fn validate_patch(req: UpdateEntryRequest) -> ApiResult<EntryPatch> {
    let mut errs = FieldErrors::default();
    let patch = EntryPatch {
        amount: req
            .amount
            .and_then(|a| errs.check("amount", validation::amount(a))),
        category: req
            .category
            .as_deref()
            .and_then(|c| errs.check("category", validation::category(c))),
        date: req
            .date
            .as_deref()
            .and_then(|d| errs.check("date", validation::date(d))),
        note: req
            .note
            .map(|n| errs.check("note", validation::note(n.as_deref())).flatten()),
    };
    errs.finish()?;
    Ok(patch)
}

pub fn filter_from(params: &ListParams) -> ApiResult<EntryFilter> {
    let range = DateRange::parse(params.start.as_deref(), params.end.as_deref())?;
    let mut errs = FieldErrors::default();
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        errs.add("limit", format!("must be between 1 and {MAX_LIMIT}"));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        errs.add("offset", "must be non-negative");
    }
    errs.finish()?;

    Ok(EntryFilter {
        start: range.start,
        end: range.end,
        category: params
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        limit: Some(limit),
        offset,
    })
}

pub async fn create(
    state: &AppState,
    kind: EntryKind,
    user_id: Uuid,
    req: CreateEntryRequest,
) -> ApiResult<Entry> {
    let entry = validate_new(req)?;
    let row = state.ledger.insert(kind, user_id, &entry).await?;
    info!(kind = kind.name(), id = row.id, %user_id, "entry created");
    Ok(row)
}

pub async fn list(
    state: &AppState,
    kind: EntryKind,
    user_id: Uuid,
    params: &ListParams,
) -> ApiResult<Vec<Entry>> {
    let filter = filter_from(params)?;
    state.ledger.list(kind, user_id, &filter).await
}

pub async fn get(state: &AppState, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<Entry> {
    state
        .ledger
        .get(kind, user_id, id)
        .await?
        .ok_or(AppError::NotFound(kind.label()))
}

pub async fn update(
    state: &AppState,
    kind: EntryKind,
    user_id: Uuid,
    id: i64,
    req: UpdateEntryRequest,
) -> ApiResult<Entry> {
    let patch = validate_patch(req)?;
    match state.ledger.update(kind, user_id, id, &patch).await? {
        Some(row) => {
            info!(kind = kind.name(), id, %user_id, "entry updated");
            Ok(row)
        }
        None => {
            warn!(kind = kind.name(), id, %user_id, "update of missing or foreign entry");
            Err(AppError::NotFound(kind.label()))
        }
    }
}

pub async fn delete(state: &AppState, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<()> {
    if state.ledger.delete(kind, user_id, id).await? {
        info!(kind = kind.name(), id, %user_id, "entry deleted");
        Ok(())
    } else {
        warn!(kind = kind.name(), id, %user_id, "delete of missing or foreign entry");
        Err(AppError::NotFound(kind.label()))
    }
}
