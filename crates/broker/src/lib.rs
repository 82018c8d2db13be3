//! Message broker boundary.

pub mod broker;
pub mod in_memory;

pub use broker::MessageBroker;
pub use in_memory::{InMemoryBroker, InMemoryBrokerError};
