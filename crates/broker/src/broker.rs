//! Message broker abstraction (transport only).
//!
//! The outbox hands each claimed record's [`Message`] to a `MessageBroker`
//! exactly once per delivery attempt. The broker knows nothing about records,
//! claims or retries: it either accepts the message or reports an error.
//!
//! ## Delivery Guarantees
//!
//! The dispatch engine provides **at-least-once delivery**:
//! - A message may be sent more than once (a crash between a successful send
//!   and persisting `Delivered` causes a resend on the next tick)
//! - Consumers must be idempotent
//!
//! ## Error Handling
//!
//! `send()` failures are rendered with `Display` and stored on the record as
//! `last_error`. The engine then applies the retrial policy; implementations
//! should not retry internally.
//!
//! ## Thread Safety
//!
//! The trait requires `Send + Sync`; a single broker instance is shared by
//! the processor task for the lifetime of the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use outbox_core::Message;

/// Transport-agnostic message broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish one message. Returns once the transport acknowledged it.
    async fn send(&self, message: &Message) -> Result<(), Self::Error>;
}

#[async_trait]
impl<B> MessageBroker for Arc<B>
where
    B: MessageBroker + ?Sized,
{
    type Error = B::Error;

    async fn send(&self, message: &Message) -> Result<(), Self::Error> {
        (**self).send(message).await
    }
}
