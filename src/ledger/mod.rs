//! Income and expense records. Both resources share one implementation,
//! parameterized by [`Ledger`], and differ only in table and path.

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Expense,
}

impl EntryKind {
    pub fn table(self) -> &'static str {
        match self {
            EntryKind::Income => "incomes",
            EntryKind::Expense => "expenses",
        }
    }

    /// Lower-case name used in paths and CSV exports.
    pub fn name(self) -> &'static str {
        match self {
            EntryKind::Income => "income",
            EntryKind::Expense => "expense",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntryKind::Income => "Income",
            EntryKind::Expense => "Expense",
        }
    }
}

/// Binds a resource marker type to its [`EntryKind`] so handlers can be
/// instantiated per resource (`create::<Income>`).
pub trait Ledger: Send + Sync + 'static {
    const KIND: EntryKind;
}
