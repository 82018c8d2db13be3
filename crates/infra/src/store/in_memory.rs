use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use outbox_core::{Record, RecordId, RecordState};

use super::{RecordStats, RecordStore, StoreError, StoreResult};

/// Store operation, used to inject one-shot failures in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Add,
    Claim,
    Fetch,
    Update,
    ReleaseByOwner,
    ReleaseOlderThan,
    Delete,
}

#[derive(Debug, Default)]
struct Inner {
    records: RwLock<HashMap<RecordId, Record>>,
    failures: Mutex<Vec<StoreOperation>>,
    calls: AtomicUsize,
}

/// In-memory record store.
///
/// Intended for tests/dev. Claims are check-and-set under one write lock, so
/// concurrent dispatchers sharing a store behave like instances sharing a
/// database. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    inner: Arc<Inner>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction. Records added through it become visible on `commit`.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            target: Arc::clone(&self.inner),
            staged: Vec::new(),
        }
    }

    /// Make the next call of `op` fail with `StoreError::Backend`.
    pub fn fail_next(&self, op: StoreOperation) {
        if let Ok(mut failures) = self.inner.failures.lock() {
            failures.push(op);
        }
    }

    /// Total number of store calls made through the `RecordStore` trait.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Every committed record, ordered by `created_on` then `id`.
    pub fn records(&self) -> StoreResult<Vec<Record>> {
        let records = self.read()?;
        let mut all: Vec<Record> = records.values().cloned().collect();
        sort_records(&mut all);
        Ok(all)
    }

    fn enter(&self, op: StoreOperation) -> StoreResult<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let mut failures = self
            .inner
            .failures
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        if let Some(pos) = failures.iter().position(|f| *f == op) {
            failures.remove(pos);
            return Err(StoreError::Backend(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<RecordId, Record>>> {
        self.inner
            .records
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<RecordId, Record>>> {
        self.inner
            .records
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| a.created_on.cmp(&b.created_on).then(a.id.cmp(&b.id)));
}

/// Staged writes against an [`InMemoryRecordStore`].
///
/// Dropping the transaction without calling [`commit`](Self::commit) discards
/// everything staged, like a database rollback.
#[derive(Debug)]
pub struct InMemoryTransaction {
    target: Arc<Inner>,
    staged: Vec<Record>,
}

impl InMemoryTransaction {
    /// Number of records staged so far.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Publish every staged record atomically. Nothing is written if any id
    /// already exists.
    pub fn commit(mut self) -> StoreResult<usize> {
        let staged = std::mem::take(&mut self.staged);
        let mut records = self
            .target
            .records
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        if let Some(dup) = staged.iter().find(|r| records.contains_key(&r.id)) {
            return Err(StoreError::AlreadyExists(dup.id.to_string()));
        }

        let count = staged.len();
        for record in staged {
            records.insert(record.id, record);
        }
        Ok(count)
    }

    /// Discard every staged record.
    pub fn rollback(mut self) {
        self.staged.clear();
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::debug!(
                discarded = self.staged.len(),
                "in-memory transaction dropped without commit"
            );
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    type Tx = InMemoryTransaction;

    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> StoreResult<()> {
        self.enter(StoreOperation::Add)?;

        if !Arc::ptr_eq(&tx.target, &self.inner) {
            return Err(StoreError::Backend(
                "transaction belongs to a different store".to_string(),
            ));
        }
        if tx.staged.iter().any(|r| r.id == record.id) || self.read()?.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }

        tx.staged.push(record.clone());
        Ok(())
    }

    async fn claim_pending_records(&self, owner: &str, now: DateTime<Utc>) -> StoreResult<u64> {
        self.enter(StoreOperation::Claim)?;

        let mut records = self.write()?;
        let mut claimed = 0;
        for record in records.values_mut().filter(|r| r.is_claimable()) {
            record.claim(owner, now)?;
            claimed += 1;
        }
        Ok(claimed)
    }

    async fn fetch_claimed_records(&self, owner: &str) -> StoreResult<Vec<Record>> {
        self.enter(StoreOperation::Fetch)?;

        let records = self.read()?;
        let mut mine: Vec<Record> = records
            .values()
            .filter(|r| r.lock_owner() == Some(owner))
            .cloned()
            .collect();
        sort_records(&mut mine);
        Ok(mine)
    }

    async fn update_record(&self, record: &Record) -> StoreResult<()> {
        self.enter(StoreOperation::Update)?;

        let mut records = self.write()?;
        let stored = records
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(record.id));
        }

        stored.state = record.state;
        stored.claim = record.claim.clone();
        stored.processed_on = record.processed_on;
        stored.attempt_count = record.attempt_count;
        stored.last_attempt_on = record.last_attempt_on;
        stored.last_error = record.last_error.clone();
        Ok(())
    }

    async fn release_claims_by_owner(&self, owner: &str) -> StoreResult<u64> {
        self.enter(StoreOperation::ReleaseByOwner)?;

        let mut records = self.write()?;
        let mut released = 0;
        for record in records
            .values_mut()
            .filter(|r| r.lock_owner() == Some(owner))
        {
            record.release_claim();
            released += 1;
        }
        Ok(released)
    }

    async fn release_claims_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.enter(StoreOperation::ReleaseOlderThan)?;

        let mut records = self.write()?;
        let mut released = 0;
        for record in records
            .values_mut()
            .filter(|r| r.locked_on().is_some_and(|at| at < cutoff))
        {
            record.release_claim();
            released += 1;
        }
        Ok(released)
    }

    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.enter(StoreOperation::Delete)?;

        let mut records = self.write()?;
        let before = records.len();
        records.retain(|_, r| !(r.is_terminal() && r.created_on < cutoff));
        Ok((before - records.len()) as u64)
    }

    async fn get_record(&self, id: RecordId) -> StoreResult<Option<Record>> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn stats(&self) -> StoreResult<RecordStats> {
        let records = self.read()?;
        let mut stats = RecordStats::default();
        for record in records.values() {
            match record.state {
                RecordState::PendingDelivery => {
                    stats.pending += 1;
                    if record.is_claimed() {
                        stats.claimed += 1;
                    }
                }
                RecordState::Delivered => stats.delivered += 1,
                RecordState::MaxAttemptsReached => stats.max_attempts_reached += 1,
            }
        }
        Ok(stats)
    }
}
