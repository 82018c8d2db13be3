//! Redis Streams-backed message broker.
//!
//! Each message is appended with `XADD` to the stream `<prefix><topic>`:
//!
//! | Field | Value |
//! |-------|-------|
//! | `key` | message routing key |
//! | `headers` | JSON array of `{key, value}` (order preserved) |
//! | `body` | raw body bytes |
//!
//! Consumers read with `XREADGROUP` as usual. The outbox is at-least-once, so
//! the same message can be appended twice after a crash.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::instrument;

use outbox_broker::MessageBroker;
use outbox_core::Message;

/// Default stream key prefix.
const DEFAULT_STREAM_PREFIX: &str = "outbox:";

#[derive(Debug, thiserror::Error)]
pub enum RedisBrokerError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    connection: Arc<OnceCell<MultiplexedConnection>>,
    stream_prefix: String,
}

impl RedisStreamsBroker {
    /// Create a new broker.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `stream_prefix` - Stream key prefix (default: "outbox:")
    ///
    /// The connection is opened lazily on first send.
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_prefix: Option<String>,
    ) -> Result<Self, RedisBrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBrokerError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            connection: Arc::new(OnceCell::new()),
            stream_prefix: stream_prefix.unwrap_or_else(|| DEFAULT_STREAM_PREFIX.to_string()),
        })
    }

    /// Stream key a topic maps to.
    pub fn stream_key(&self, topic: &str) -> String {
        format!("{}{}", self.stream_prefix, topic)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisBrokerError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| RedisBrokerError::Connection(e.to_string()))
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl MessageBroker for RedisStreamsBroker {
    type Error = RedisBrokerError;

    #[instrument(
        skip(self, message),
        fields(topic = %message.topic, key = %message.key),
        err
    )]
    async fn send(&self, message: &Message) -> Result<(), Self::Error> {
        let headers = serde_json::to_string(&message.headers)
            .map_err(|e| RedisBrokerError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;

        let _: String = redis::cmd("XADD")
            .arg(self.stream_key(&message.topic))
            .arg("*") // Auto-generate entry ID
            .arg("key")
            .arg(&message.key)
            .arg("headers")
            .arg(&headers)
            .arg("body")
            .arg(message.body.as_slice())
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisBrokerError::Command(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_uses_prefix() {
        let broker = RedisStreamsBroker::new("redis://127.0.0.1:6379", None).unwrap();
        assert_eq!(broker.stream_key("orders"), "outbox:orders");

        let broker =
            RedisStreamsBroker::new("redis://127.0.0.1:6379", Some("app.".into())).unwrap();
        assert_eq!(broker.stream_key("orders"), "app.orders");
    }

    #[test]
    fn invalid_url_is_a_connection_error() {
        let err = RedisStreamsBroker::new("not a url", None).unwrap_err();
        assert!(matches!(err, RedisBrokerError::Connection(_)));
    }
}
