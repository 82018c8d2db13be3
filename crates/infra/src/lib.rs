//! Infrastructure layer: record stores, broker transports and the dispatch engine.

pub mod broker;
pub mod dispatch;
pub mod store;


pub use dispatch::{
    ConfigError, Dispatcher, DispatcherHandle, DispatcherSettings, OutboxError, Publisher,
    RecordCleaner, RecordProcessor, RecordUnlocker,
};
pub use store::{
    InMemoryRecordStore, InMemoryTransaction, PostgresRecordStore, RecordStats, RecordStore,
    StoreError, StoreOperation, StoreResult,
};
