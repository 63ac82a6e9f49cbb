use axum::Router;

use crate::{
    ledger::{handlers, EntryKind, Ledger},
    state::AppState,
};

pub struct Expense;

impl Ledger for Expense {
    const KIND: EntryKind = EntryKind::Expense;
}

pub fn router() -> Router<AppState> {
    handlers::routes::<Expense>()
}
