//! The persisted outbox record and its delivery state machine.
//!
//! ```text
//! PendingDelivery ──send ok──────────────► Delivered          (terminal)
//!        │
//!        └──send failed, policy exhausted─► MaxAttemptsReached (terminal)
//! ```
//!
//! Every store and the processor go through these methods, so the transition
//! rules live in exactly one place.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult};
use crate::id::RecordId;
use crate::message::Message;
use crate::policy::RetrialPolicy;

/// Delivery state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    PendingDelivery,
    Delivered,
    MaxAttemptsReached,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::PendingDelivery => "pending_delivery",
            RecordState::Delivered => "delivered",
            RecordState::MaxAttemptsReached => "max_attempts_reached",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Delivered | RecordState::MaxAttemptsReached
        )
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordState {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_delivery" => Ok(RecordState::PendingDelivery),
            "delivered" => Ok(RecordState::Delivered),
            "max_attempts_reached" => Ok(RecordState::MaxAttemptsReached),
            other => Err(RecordError::validation(format!("unknown record state: {other}"))),
        }
    }
}

/// An in-flight claim: which instance holds the record and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub owner: String,
    pub locked_on: DateTime<Utc>,
}

/// Persisted unit of outbox work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub message: Message,
    pub state: RecordState,
    pub created_on: DateTime<Utc>,
    pub claim: Option<Claim>,
    pub processed_on: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub last_attempt_on: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Record {
    /// A fresh record: pending, unclaimed, never attempted.
    pub fn new(id: RecordId, message: Message, created_on: DateTime<Utc>) -> Self {
        Self {
            id,
            message,
            state: RecordState::PendingDelivery,
            created_on,
            claim: None,
            processed_on: None,
            attempt_count: 0,
            last_attempt_on: None,
            last_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    pub fn is_claimable(&self) -> bool {
        self.state == RecordState::PendingDelivery && self.claim.is_none()
    }

    pub fn lock_owner(&self) -> Option<&str> {
        self.claim.as_ref().map(|c| c.owner.as_str())
    }

    pub fn locked_on(&self) -> Option<DateTime<Utc>> {
        self.claim.as_ref().map(|c| c.locked_on)
    }

    pub fn claim(&mut self, owner: impl Into<String>, at: DateTime<Utc>) -> RecordResult<()> {
        self.ensure_pending()?;
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(RecordError::validation("claim owner cannot be empty"));
        }
        if let Some(existing) = &self.claim {
            return Err(RecordError::AlreadyClaimed {
                id: self.id,
                owner: existing.owner.clone(),
            });
        }
        self.claim = Some(Claim {
            owner,
            locked_on: at,
        });
        Ok(())
    }

    /// Drop the claim, if any. Allowed in any state.
    pub fn release_claim(&mut self) {
        self.claim = None;
    }

    pub fn begin_attempt(&mut self, at: DateTime<Utc>) -> RecordResult<()> {
        self.ensure_pending()?;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_on = Some(at);
        Ok(())
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> RecordResult<()> {
        self.ensure_pending()?;
        self.claim = None;
        self.state = RecordState::Delivered;
        self.processed_on = Some(at);
        Ok(())
    }

    /// Record a failed send. Moves to `MaxAttemptsReached` once `policy` is
    /// exhausted, otherwise the record stays pending for the next tick.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        policy: &RetrialPolicy,
    ) -> RecordResult<()> {
        self.ensure_pending()?;
        self.claim = None;
        self.last_error = Some(error.into());
        if policy.is_exhausted(self.attempt_count) {
            self.state = RecordState::MaxAttemptsReached;
        }
        Ok(())
    }

    fn ensure_pending(&self) -> RecordResult<()> {
        if self.is_terminal() {
            return Err(RecordError::Terminal {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }
}
