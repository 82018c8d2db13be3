//! Infrastructure message broker implementations.
//!
//! The broker abstraction lives in `outbox-broker` as pure mechanics.
//! This module provides infrastructure-backed transports (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisBrokerError, RedisStreamsBroker};
