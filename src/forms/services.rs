use std::collections::BTreeMap;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use super::dto::{CategoryTotal, FormParams, FormSummary, KindSummary};
use crate::{
    error::ApiResult,
    ledger::{
        repo_types::{Entry, EntryFilter},
        EntryKind,
    },
    serde_ext::ISO_DATE,
    state::AppState,
    validation::DateRange,
};

/// Money always leaves with two decimals, zero included ("0.00").
fn cents(mut amount: Decimal) -> Decimal {
    amount.rescale(2);
    amount
}

pub fn summarize(entries: &[Entry]) -> KindSummary {
    let mut groups: BTreeMap<&str, (Decimal, usize)> = BTreeMap::new();
    for e in entries {
        let slot = groups.entry(e.category.as_str()).or_insert((Decimal::ZERO, 0));
        slot.0 += e.amount;
        slot.1 += 1;
    }
    let by_category: Vec<CategoryTotal> = groups
        .into_iter()
        .map(|(category, (total, count))| CategoryTotal {
            category: category.to_string(),
            total: cents(total),
            count,
        })
        .collect();
    KindSummary {
        total: cents(by_category.iter().map(|c| c.total).sum()),
        count: entries.len(),
        by_category,
    }
}

async fn entries_in(
    state: &AppState,
    kind: EntryKind,
    user_id: Uuid,
    range: &DateRange,
) -> ApiResult<Vec<Entry>> {
    let filter = EntryFilter {
        start: range.start,
        end: range.end,
        category: None,
        limit: None,
        offset: 0,
    };
    state.ledger.list(kind, user_id, &filter).await
}

pub async fn generate(state: &AppState, user_id: Uuid, params: &FormParams) -> ApiResult<FormSummary> {
    let range = DateRange::parse(params.start.as_deref(), params.end.as_deref())?;
    let incomes = entries_in(state, EntryKind::Income, user_id, &range).await?;
    let expenses = entries_in(state, EntryKind::Expense, user_id, &range).await?;
    let receipt_count = state.receipts.count_in_range(user_id, &range).await?;

    let income = summarize(&incomes);
    let expense = summarize(&expenses);
    debug!(%user_id, incomes = income.count, expenses = expense.count, "form generated");
    Ok(FormSummary {
        start: range.start,
        end: range.end,
        net: cents(income.total - expense.total),
        income,
        expense,
        receipt_count,
    })
}

/// `kind,date,category,amount,note` rows, incomes first, each by date ascending.
pub async fn export_csv(state: &AppState, user_id: Uuid, params: &FormParams) -> ApiResult<Vec<u8>> {
    let range = DateRange::parse(params.start.as_deref(), params.end.as_deref())?;
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["kind", "date", "category", "amount", "note"])
        .context("write csv header")?;

    for kind in [EntryKind::Income, EntryKind::Expense] {
        let mut rows = entries_in(state, kind, user_id, &range).await?;
        rows.reverse();
        for e in rows {
            let date = e.date.format(ISO_DATE).context("format date")?;
            wtr.write_record([
                kind.name(),
                date.as_str(),
                e.category.as_str(),
                e.amount.to_string().as_str(),
                e.note.as_deref().unwrap_or(""),
            ])
            .context("write csv row")?;
        }
    }
    let bytes = wtr.into_inner().map_err(|e| anyhow::anyhow!("flush csv: {e}"))?;
    Ok(bytes)
}
