//! Transactional outbox writer.

use std::sync::Arc;

use tracing::{debug, error};

use outbox_core::{Clock, IdGenerator, Message, Record, RecordId, SystemClock, UuidV7Generator};

use super::error::OutboxError;
use crate::store::RecordStore;

/// Writes new records through the caller's transaction.
///
/// The record becomes visible to dispatchers only when the caller commits,
/// and disappears with a rollback.
pub struct Publisher<S: RecordStore> {
    store: S,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<S: RecordStore> Publisher<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidV7Generator),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Stage `message` for delivery inside `tx`. Returns the new record id.
    pub async fn send(&self, message: Message, tx: &mut S::Tx) -> Result<RecordId, OutboxError> {
        let record = Record::new(self.ids.new_id(), message, self.clock.now());

        match self.store.add_record_tx(&record, tx).await {
            Ok(()) => {
                debug!(record_id = %record.id, topic = %record.message.topic, "record added to outbox");
                Ok(record.id)
            }
            Err(e) => {
                error!(record_id = %record.id, error = %e, "failed to add record to outbox");
                Err(OutboxError::Persistence(e))
            }
        }
    }
}
