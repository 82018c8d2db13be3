//! Outbox dispatch engine.
//!
//! - [`Publisher`] writes records inside the caller's transaction
//! - [`RecordProcessor`] claims and delivers them
//! - [`RecordUnlocker`] reclaims stale claims
//! - [`RecordCleaner`] purges old terminal records
//! - [`Dispatcher`] runs the last three periodically until cancelled

pub mod cleaner;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod settings;
pub mod unlocker;

pub use cleaner::RecordCleaner;
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::OutboxError;
pub use processor::RecordProcessor;
pub use publisher::Publisher;
pub use settings::{ConfigError, DispatcherSettings};
pub use unlocker::RecordUnlocker;
