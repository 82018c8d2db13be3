//! In-memory broker for tests/dev.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use outbox_core::Message;
use thiserror::Error;

use crate::broker::MessageBroker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBrokerError {
    /// A scripted failure queued with [`InMemoryBroker::fail_next`].
    #[error("broker rejected message: {0}")]
    Rejected(String),

    /// Internal lock poisoning.
    #[error("in-memory broker lock poisoned")]
    Poisoned,
}

/// In-memory broker.
///
/// - Keeps every accepted message in send order, unless built with
///   [`InMemoryBroker::non_recording`]
/// - Failures can be scripted per call (FIFO) or switched on for all calls
/// - Counts every `send` call, accepted or not
#[derive(Debug)]
pub struct InMemoryBroker {
    record: bool,
    sent: Mutex<Vec<Message>>,
    scripted: Mutex<VecDeque<Option<String>>>,
    always_fail: Mutex<Option<String>>,
    calls: AtomicUsize,
    accepted: AtomicUsize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            record: true,
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            always_fail: Mutex::new(None),
            calls: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
        }
    }

    /// Counts accepted messages but drops their contents; `sent()` stays empty.
    /// For long-running processes.
    pub fn non_recording() -> Self {
        Self {
            record: false,
            ..Self::new()
        }
    }

    /// Make the next not-yet-scripted call fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(Some(reason.into()));
        }
    }

    /// Let the next not-yet-scripted call succeed. Used to interleave outcomes.
    pub fn succeed_next(&self) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(None);
        }
    }

    /// Fail every unscripted call until cleared with `None`.
    pub fn set_always_fail(&self, reason: Option<String>) {
        if let Ok(mut f) = self.always_fail.lock() {
            *f = reason;
        }
    }

    /// Messages accepted so far, in send order.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of messages accepted, recorded or not.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Total number of `send` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    type Error = InMemoryBrokerError;

    async fn send(&self, message: &Message) -> Result<(), Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .scripted
            .lock()
            .map_err(|_| InMemoryBrokerError::Poisoned)?
            .pop_front();

        let failure = match scripted {
            Some(outcome) => outcome,
            None => self
                .always_fail
                .lock()
                .map_err(|_| InMemoryBrokerError::Poisoned)?
                .clone(),
        };

        if let Some(reason) = failure {
            tracing::debug!(topic = %message.topic, key = %message.key, %reason, "in-memory broker rejected message");
            return Err(InMemoryBrokerError::Rejected(reason));
        }

        if self.record {
            self.sent
                .lock()
                .map_err(|_| InMemoryBrokerError::Poisoned)?
                .push(message.clone());
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
