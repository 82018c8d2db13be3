//! Claim, deliver and retire pending records.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use outbox_broker::MessageBroker;
use outbox_core::{Clock, Record, RetrialPolicy, SystemClock};

use super::error::OutboxError;
use crate::store::RecordStore;

/// Delivers pending records on behalf of one machine identity.
///
/// One call to [`process_records`](Self::process_records) is one tick:
/// claim everything claimable, send the claimed records in `created_on`
/// order, and stop at the first failure. Claims still held when the tick ends
/// are released so another tick (or instance) can pick the records up.
pub struct RecordProcessor<S, B> {
    store: S,
    broker: B,
    clock: Arc<dyn Clock>,
    machine_id: String,
    policy: RetrialPolicy,
}

impl<S, B> RecordProcessor<S, B>
where
    S: RecordStore,
    B: MessageBroker,
{
    pub fn new(store: S, broker: B, machine_id: impl Into<String>, policy: RetrialPolicy) -> Self {
        Self {
            store,
            broker,
            clock: Arc::new(SystemClock),
            machine_id: machine_id.into(),
            policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub async fn process_records(&self) -> Result<(), OutboxError> {
        let result = self.claim_and_deliver().await;

        match self.store.release_claims_by_owner(&self.machine_id).await {
            Ok(0) => {}
            Ok(released) => debug!(owner = %self.machine_id, released, "released leftover claims"),
            Err(e) => warn!(
                owner = %self.machine_id,
                error = %e,
                "failed to release claims; unlocker will reclaim them"
            ),
        }

        result
    }

    async fn claim_and_deliver(&self) -> Result<(), OutboxError> {
        let claimed = self
            .store
            .claim_pending_records(&self.machine_id, self.clock.now())
            .await
            .map_err(OutboxError::Claim)?;

        let records = self
            .store
            .fetch_claimed_records(&self.machine_id)
            .await
            .map_err(OutboxError::Persistence)?;

        if records.is_empty() {
            return Ok(());
        }

        debug!(owner = %self.machine_id, claimed, fetched = records.len(), "delivering claimed records");

        for record in records {
            self.deliver(record).await?;
        }
        Ok(())
    }

    async fn deliver(&self, mut record: Record) -> Result<(), OutboxError> {
        record.begin_attempt(self.clock.now())?;

        match self.broker.send(&record.message).await {
            Ok(()) => {
                record.mark_delivered(self.clock.now())?;
                self.store
                    .update_record(&record)
                    .await
                    .map_err(OutboxError::Persistence)?;

                info!(
                    record_id = %record.id,
                    topic = %record.message.topic,
                    attempt = record.attempt_count,
                    "record delivered"
                );
                Ok(())
            }
            Err(send_err) => {
                let reason = send_err.to_string();
                record.mark_failed(reason.clone(), &self.policy)?;

                if let Err(db_err) = self.store.update_record(&record).await {
                    error!(
                        record_id = %record.id,
                        error = %reason,
                        "delivery failed and the outcome could not be persisted"
                    );
                    return Err(OutboxError::Persistence(db_err));
                }

                if record.is_terminal() {
                    warn!(
                        record_id = %record.id,
                        attempts = record.attempt_count,
                        error = %reason,
                        "record reached max attempts"
                    );
                } else {
                    warn!(
                        record_id = %record.id,
                        attempt = record.attempt_count,
                        error = %reason,
                        "delivery failed, will retry"
                    );
                }

                Err(OutboxError::delivery(record.id, reason))
            }
        }
    }
}
