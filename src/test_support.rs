//! In-memory repositories and blob store behind `AppState::fake()`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{repo::UserRepo, repo_types::User},
    error::{ApiResult, AppError},
    ledger::{
        repo::LedgerRepo,
        repo_types::{Entry, EntryFilter, EntryPatch, NewEntry},
        EntryKind,
    },
    receipts::{
        repo::{ArtifactTx, ReceiptRepo},
        repo_types::{ExtractionOutcome, NewReceipt, Receipt, ReceiptStatus},
    },
    storage::StorageClient,
    validation::DateRange,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    incomes: Vec<Entry>,
    expenses: Vec<Entry>,
    receipts: Vec<Receipt>,
    // one sequence per table, like BIGSERIAL
    seq: HashMap<&'static str, i64>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let id = self.seq.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn entries(&mut self, kind: EntryKind) -> &mut Vec<Entry> {
        match kind {
            EntryKind::Income => &mut self.incomes,
            EntryKind::Expense => &mut self.expenses,
        }
    }
}

fn lock_tables(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    artifact_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        lock_tables(&self.tables)
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_by_username(&self, username: &str) -> ApiResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> ApiResult<User> {
        let mut t = self.lock();
        if t.users.iter().any(|u| u.username == username) {
            return Err(AppError::Conflict("username already taken".into()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.push(user.clone());
        Ok(user)
    }
}

#[async_trait]
impl LedgerRepo for MemoryStore {
    async fn insert(&self, kind: EntryKind, user_id: Uuid, entry: &NewEntry) -> ApiResult<Entry> {
        let mut t = self.lock();
        let now = OffsetDateTime::now_utc();
        let row = Entry {
            id: t.next_id(kind.table()),
            user_id,
            amount: entry.amount,
            category: entry.category.clone(),
            date: entry.date,
            note: entry.note.clone(),
            created_at: now,
            updated_at: now,
        };
        t.entries(kind).push(row.clone());
        Ok(row)
    }

    async fn list(
        &self,
        kind: EntryKind,
        user_id: Uuid,
        filter: &EntryFilter,
    ) -> ApiResult<Vec<Entry>> {
        let mut t = self.lock();
        let range = DateRange {
            start: filter.start,
            end: filter.end,
        };
        let mut rows: Vec<Entry> = t
            .entries(kind)
            .iter()
            .filter(|e| e.user_id == user_id && range.contains(e.date))
            .filter(|e| {
                filter
                    .category
                    .as_deref()
                    .map_or(true, |c| e.category.to_lowercase() == c.to_lowercase())
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(rows
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(limit)
            .collect())
    }

    async fn get(&self, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<Option<Entry>> {
        let mut t = self.lock();
        Ok(t
            .entries(kind)
            .iter()
            .find(|e| e.id == id && e.user_id == user_id)
            .cloned())
    }

    async fn update(
        &self,
        kind: EntryKind,
        user_id: Uuid,
        id: i64,
        patch: &EntryPatch,
    ) -> ApiResult<Option<Entry>> {
        let mut t = self.lock();
        let Some(row) = t
            .entries(kind)
            .iter_mut()
            .find(|e| e.id == id && e.user_id == user_id)
        else {
            return Ok(None);
        };
        if let Some(amount) = patch.amount {
            row.amount = amount;
        }
        if let Some(category) = &patch.category {
            row.category = category.clone();
        }
        if let Some(date) = patch.date {
            row.date = date;
        }
        if let Some(note) = &patch.note {
            row.note = note.clone();
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(Some(row.clone()))
    }

    async fn delete(&self, kind: EntryKind, user_id: Uuid, id: i64) -> ApiResult<bool> {
        let mut t = self.lock();
        let rows = t.entries(kind);
        let before = rows.len();
        rows.retain(|e| !(e.id == id && e.user_id == user_id));
        let removed = rows.len() < before;
        if removed && kind == EntryKind::Expense {
            // ON DELETE SET NULL
            for r in t.receipts.iter_mut().filter(|r| r.expense_id == Some(id)) {
                r.expense_id = None;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ReceiptRepo for MemoryStore {
    async fn lock_artifact(&self, file_key: &str) -> ApiResult<Box<dyn ArtifactTx>> {
        let key_lock = self
            .artifact_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(file_key.to_string())
            .or_default()
            .clone();
        let held = key_lock.lock_owned().await;
        Ok(Box::new(MemoryArtifactTx {
            tables: self.tables.clone(),
            _held: held,
        }))
    }

    async fn record_extraction(
        &self,
        user_id: Uuid,
        id: i64,
        outcome: &ExtractionOutcome,
    ) -> ApiResult<Option<Receipt>> {
        let mut t = self.lock();
        let Some(row) = t
            .receipts
            .iter_mut()
            .find(|r| r.id == id && r.user_id == user_id)
        else {
            return Ok(None);
        };
        row.status = outcome.status;
        row.vendor = outcome.vendor.clone();
        row.amount = outcome.amount;
        row.receipt_date = outcome.receipt_date;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(Some(row.clone()))
    }

    async fn get(&self, user_id: Uuid, id: i64) -> ApiResult<Option<Receipt>> {
        Ok(self
            .lock()
            .receipts
            .iter()
            .find(|r| r.id == id && r.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: Uuid) -> ApiResult<Vec<Receipt>> {
        let mut rows: Vec<Receipt> = self
            .lock()
            .receipts
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn set_expense(
        &self,
        user_id: Uuid,
        id: i64,
        expense_id: Option<i64>,
    ) -> ApiResult<Option<Receipt>> {
        let mut t = self.lock();
        let Some(row) = t
            .receipts
            .iter_mut()
            .find(|r| r.id == id && r.user_id == user_id)
        else {
            return Ok(None);
        };
        row.expense_id = expense_id;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(Some(row.clone()))
    }

    async fn count_in_range(&self, user_id: Uuid, range: &DateRange) -> ApiResult<i64> {
        Ok(self
            .lock()
            .receipts
            .iter()
            .filter(|r| r.user_id == user_id && range.contains(r.created_at.date()))
            .count() as i64)
    }
}

/// Writes land immediately; only the key lock follows the unit of work.
pub struct MemoryArtifactTx {
    tables: Arc<Mutex<Tables>>,
    _held: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl ArtifactTx for MemoryArtifactTx {
    async fn insert(&mut self, user_id: Uuid, r: &NewReceipt) -> ApiResult<Receipt> {
        let mut t = lock_tables(&self.tables);
        let now = OffsetDateTime::now_utc();
        let row = Receipt {
            id: t.next_id("receipts"),
            user_id,
            file_key: r.file_key.clone(),
            file_name: r.file_name.clone(),
            content_type: r.content_type.clone(),
            size_bytes: r.size_bytes,
            sha256: r.sha256.clone(),
            status: ReceiptStatus::Pending,
            vendor: None,
            amount: None,
            receipt_date: None,
            expense_id: r.expense_id,
            created_at: now,
            updated_at: now,
        };
        t.receipts.push(row.clone());
        Ok(row)
    }

    async fn delete(&mut self, user_id: Uuid, id: i64) -> ApiResult<Option<Receipt>> {
        let mut t = lock_tables(&self.tables);
        let pos = t
            .receipts
            .iter()
            .position(|r| r.id == id && r.user_id == user_id);
        Ok(pos.map(|i| t.receipts.remove(i)))
    }

    async fn count_by_key(&mut self, file_key: &str) -> ApiResult<i64> {
        Ok(lock_tables(&self.tables)
            .receipts
            .iter()
            .filter(|r| r.file_key == file_key)
            .count() as i64)
    }

    async fn commit(self: Box<Self>) -> ApiResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Bytes> {
        self.lock()
            .get(key)
            .cloned()
            .with_context(|| format!("no object {key}"))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn presign_get(&self, _key: &str, _seconds: u64) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}
