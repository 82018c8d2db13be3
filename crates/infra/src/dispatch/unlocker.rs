//! Reclaims claims abandoned by crashed or stalled instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use outbox_core::{Clock, SystemClock};

use super::error::OutboxError;
use crate::store::RecordStore;

/// Clears every claim older than `max_lock_duration`, whoever holds it.
pub struct RecordUnlocker<S> {
    store: S,
    clock: Arc<dyn Clock>,
    max_lock_duration: Duration,
}

impl<S: RecordStore> RecordUnlocker<S> {
    pub fn new(store: S, max_lock_duration: Duration) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            max_lock_duration,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn unlock_expired_messages(&self) -> Result<(), OutboxError> {
        let cutoff = cutoff(self.clock.now(), self.max_lock_duration);
        let released = self.store.release_claims_older_than(cutoff).await?;

        if released > 0 {
            info!(released, %cutoff, "released stale claims");
        } else {
            debug!(%cutoff, "no stale claims");
        }
        Ok(())
    }
}

/// `now - age`, saturating at the earliest representable instant.
pub(crate) fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_core::{ManualClock, Message, Record, RecordId};

    use crate::store::{InMemoryRecordStore, StoreOperation};

    #[tokio::test]
    async fn only_stale_claims_are_released() {
        let store = InMemoryRecordStore::new();
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));

        let mut tx = store.begin();
        let record = Record::new(RecordId::new(), Message::new("t", "k", vec![]), start);
        store.add_record_tx(&record, &mut tx).await.unwrap();
        tx.commit().unwrap();
        store.claim_pending_records("crashed-node", start).await.unwrap();

        let unlocker = RecordUnlocker::new(store.clone(), Duration::from_secs(60))
            .with_clock(clock.clone());

        clock.advance(chrono::Duration::seconds(30));
        unlocker.unlock_expired_messages().await.unwrap();
        assert_eq!(store.stats().await.unwrap().claimed, 1);

        clock.advance(chrono::Duration::seconds(31));
        unlocker.unlock_expired_messages().await.unwrap();
        let stored = store.get_record(record.id).await.unwrap().unwrap();
        assert!(stored.is_claimable());
    }

    #[tokio::test]
    async fn store_error_is_reported() {
        let store = InMemoryRecordStore::new();
        store.fail_next(StoreOperation::ReleaseOlderThan);
        let unlocker = RecordUnlocker::new(store, Duration::from_secs(60));

        let err = unlocker.unlock_expired_messages().await.unwrap_err();
        assert!(matches!(err, OutboxError::Persistence(_)));
    }

    #[test]
    fn cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(cutoff(now, Duration::from_secs(10)), now - chrono::Duration::seconds(10));
        assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
