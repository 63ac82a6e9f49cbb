use axum::Router;

use crate::{
    ledger::{handlers, EntryKind, Ledger},
    state::AppState,
};

pub struct Income;

impl Ledger for Income {
    const KIND: EntryKind = EntryKind::Income;
}

pub fn router() -> Router<AppState> {
    handlers::routes::<Income>()
}
