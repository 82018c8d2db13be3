//! The outgoing message carried by a record.
//!
//! A `Message` is opaque to the outbox: a routing `key`, ordered string
//! headers, a byte body and a destination `topic`. It is immutable once it has
//! been written to the outbox.

use serde::{Deserialize, Serialize};

/// One header key/value pair. Order is preserved end-to-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Payload to deliver through the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    pub topic: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            headers: Vec::new(),
            body: body.into(),
            topic: topic.into(),
        }
    }

    /// Append a header (keeps insertion order).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    /// First header value for `key`, if any.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_keep_insertion_order() {
        let msg = Message::new("orders", "order-1", b"{}".to_vec())
            .with_header("b", "2")
            .with_header("a", "1");

        let keys: Vec<_> = msg.headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(msg.header("a"), Some("1"));
        assert_eq!(msg.header("missing"), None);
    }
}
