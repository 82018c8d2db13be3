//! Retention cleanup of terminal records.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use outbox_core::{Clock, SystemClock};

use super::error::OutboxError;
use super::unlocker::cutoff;
use crate::store::RecordStore;

/// Deletes delivered and exhausted records created more than
/// `retention_duration` ago. Pending records are never deleted by age.
pub struct RecordCleaner<S> {
    store: S,
    clock: Arc<dyn Clock>,
    retention_duration: Duration,
}

impl<S: RecordStore> RecordCleaner<S> {
    pub fn new(store: S, retention_duration: Duration) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retention_duration,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn remove_expired_messages(&self) -> Result<(), OutboxError> {
        let cutoff = cutoff(self.clock.now(), self.retention_duration);
        let removed = self.store.delete_records_older_than(cutoff).await?;

        if removed > 0 {
            info!(removed, %cutoff, "removed expired records");
        } else {
            debug!(%cutoff, "no expired records");
        }
        Ok(())
    }
}
