//! Durable record storage.
//!
//! The `RecordStore` trait is the only way the dispatch engine touches
//! persistence. Implementations must honor three guarantees:
//!
//! - **Transactional insert**: `add_record_tx` writes through the caller's
//!   transaction handle, so the record commits or rolls back together with the
//!   caller's business data.
//! - **Atomic claim**: `claim_pending_records` only claims rows that are still
//!   `pending_delivery` and unclaimed at the instant of the write. Two instances
//!   racing on the same row can never both own it.
//! - **Terminal records are frozen**: `update_record` refuses to overwrite a
//!   stored record that already reached a terminal state.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use outbox_core::{Record, RecordError, RecordId};

pub use in_memory::{InMemoryRecordStore, InMemoryTransaction, StoreOperation};
pub use postgres::PostgresRecordStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordId),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("record {0} is terminal and cannot be updated")]
    Conflict(RecordId),
    #[error("stored record is invalid: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Backend(String),
}

impl From<RecordError> for StoreError {
    fn from(err: RecordError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Record counts by state. `claimed` counts pending records currently held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub pending: u64,
    pub claimed: u64,
    pub delivered: u64,
    pub max_attempts_reached: u64,
}

impl RecordStats {
    pub fn total(&self) -> u64 {
        self.pending + self.delivered + self.max_attempts_reached
    }
}

/// Record store abstraction.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Caller-owned transaction handle that `add_record_tx` writes through.
    type Tx: Send;

    /// Insert a new record inside the caller's transaction.
    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> StoreResult<()>;

    /// Claim every pending, unclaimed record for `owner`. Returns the number claimed.
    async fn claim_pending_records(&self, owner: &str, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Records currently claimed by `owner`, ordered by `created_on` then `id`.
    async fn fetch_claimed_records(&self, owner: &str) -> StoreResult<Vec<Record>>;

    /// Persist the mutable fields of `record`.
    ///
    /// Fails with `NotFound` when the row is gone and `Conflict` when the
    /// stored row is already terminal.
    async fn update_record(&self, record: &Record) -> StoreResult<()>;

    /// Clear every claim held by `owner`. Returns the number released.
    async fn release_claims_by_owner(&self, owner: &str) -> StoreResult<u64>;

    /// Clear every claim taken before `cutoff`, whatever its owner.
    async fn release_claims_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete terminal records created before `cutoff`. Pending records are kept.
    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Load one record.
    async fn get_record(&self, id: RecordId) -> StoreResult<Option<Record>>;

    /// Count records by state.
    async fn stats(&self) -> StoreResult<RecordStats>;
}

#[async_trait]
impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    type Tx = S::Tx;

    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> StoreResult<()> {
        (**self).add_record_tx(record, tx).await
    }

    async fn claim_pending_records(&self, owner: &str, now: DateTime<Utc>) -> StoreResult<u64> {
        (**self).claim_pending_records(owner, now).await
    }

    async fn fetch_claimed_records(&self, owner: &str) -> StoreResult<Vec<Record>> {
        (**self).fetch_claimed_records(owner).await
    }

    async fn update_record(&self, record: &Record) -> StoreResult<()> {
        (**self).update_record(record).await
    }

    async fn release_claims_by_owner(&self, owner: &str) -> StoreResult<u64> {
        (**self).release_claims_by_owner(owner).await
    }

    async fn release_claims_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        (**self).release_claims_older_than(cutoff).await
    }

    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        (**self).delete_records_older_than(cutoff).await
    }

    async fn get_record(&self, id: RecordId) -> StoreResult<Option<Record>> {
        (**self).get_record(id).await
    }

    async fn stats(&self) -> StoreResult<RecordStats> {
        (**self).stats().await
    }
}
