//! Record error model.

use thiserror::Error;

use crate::id::RecordId;
use crate::record::RecordState;

/// Result type used across the domain layer.
pub type RecordResult<T> = Result<T, RecordError>;

/// Domain-level error raised by the record state machine.
///
/// Keep this focused on deterministic state-machine failures. Storage and
/// transport failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record already reached `Delivered` or `MaxAttemptsReached`.
    #[error("record {id} is terminal ({state}) and cannot change")]
    Terminal { id: RecordId, state: RecordState },

    /// The record is already claimed by some owner.
    #[error("record {id} is already claimed by {owner}")]
    AlreadyClaimed { id: RecordId, owner: String },

    /// A value failed validation (e.g. empty claim owner).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl RecordError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
