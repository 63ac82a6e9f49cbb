//! Reports derived on demand from a user's incomes, expenses and receipts.
//! Nothing here is persisted.

pub mod dto;
pub mod handlers;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::form_routes()
}
