//! Dispatch engine error model.

use thiserror::Error;

use outbox_core::{RecordError, RecordId};

use crate::store::StoreError;

/// Error surfaced by the publisher and the three periodic tasks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// Reading or writing records failed.
    #[error("persistence error: {0}")]
    Persistence(#[source] StoreError),

    /// The broker rejected a record's message.
    #[error("delivery of record {record_id} failed: {message}")]
    Delivery { record_id: RecordId, message: String },

    /// Claiming pending records failed.
    #[error("claim error: {0}")]
    Claim(#[source] StoreError),

    /// A stored record violated the state machine.
    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

impl OutboxError {
    pub fn delivery(record_id: RecordId, message: impl Into<String>) -> Self {
        Self::Delivery {
            record_id,
            message: message.into(),
        }
    }
}

impl From<StoreError> for OutboxError {
    fn from(err: StoreError) -> Self {
        Self::Persistence(err)
    }
}
