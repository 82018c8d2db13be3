//! Relay process configuration.

use std::net::SocketAddr;

use outbox_infra::{ConfigError, DispatcherSettings};
use uuid::Uuid;

pub const ENV_MACHINE_ID: &str = "OUTBOX_MACHINE_ID";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_STREAM_PREFIX: &str = "OUTBOX_STREAM_PREFIX";
pub const ENV_HTTP_ADDR: &str = "OUTBOX_HTTP_ADDR";
pub const ENV_ERROR_BUFFER: &str = "OUTBOX_ERROR_BUFFER";

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_ERROR_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Claim owner written on every record this instance processes. Defaults
    /// to a fresh UUIDv7 so two processes never share one.
    pub machine_id: String,
    /// Postgres URL. `None` runs the relay on the in-memory store.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub stream_prefix: Option<String>,
    pub http_addr: SocketAddr,
    /// Capacity of the dispatcher error channel.
    pub error_buffer: usize,
    pub dispatcher: DispatcherSettings,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let machine_id = non_empty(lookup(ENV_MACHINE_ID))
            .unwrap_or_else(|| format!("relay-{}", Uuid::now_v7()));

        let http_raw = non_empty(lookup(ENV_HTTP_ADDR)).unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = http_raw.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidVar {
            var: ENV_HTTP_ADDR.to_string(),
            value: http_raw.clone(),
            reason: e.to_string(),
        })?;

        let error_buffer = match non_empty(lookup(ENV_ERROR_BUFFER)) {
            None => DEFAULT_ERROR_BUFFER,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(ConfigError::InvalidVar {
                        var: ENV_ERROR_BUFFER.to_string(),
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::InvalidVar {
                        var: ENV_ERROR_BUFFER.to_string(),
                        value: raw,
                        reason: e.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            machine_id,
            database_url: non_empty(lookup(ENV_DATABASE_URL)),
            redis_url: non_empty(lookup(ENV_REDIS_URL)),
            stream_prefix: non_empty(lookup(ENV_STREAM_PREFIX)),
            http_addr,
            error_buffer,
            dispatcher: DispatcherSettings::from_lookup(&lookup)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.machine_id.starts_with("relay-"));
        assert!(config.database_url.is_none());
        assert_eq!(config.http_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.error_buffer, 64);
        assert_eq!(config.dispatcher, DispatcherSettings::default());
    }

    #[test]
    fn default_machine_ids_never_collide() {
        let a = RelayConfig::from_lookup(lookup(&[])).unwrap();
        let b = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_ne!(a.machine_id, b.machine_id);
    }

    #[test]
    fn reads_overrides_and_dispatcher_settings() {
        let config = RelayConfig::from_lookup(lookup(&[
            (ENV_MACHINE_ID, "node-7"),
            (ENV_DATABASE_URL, "postgres://localhost/outbox"),
            (ENV_HTTP_ADDR, "127.0.0.1:9000"),
            (ENV_ERROR_BUFFER, "8"),
            ("OUTBOX_MAX_ATTEMPTS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.machine_id, "node-7");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/outbox"));
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.error_buffer, 8);
        assert!(config.dispatcher.retrial_policy.max_attempts_enabled);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = RelayConfig::from_lookup(lookup(&[(ENV_MACHINE_ID, "  "), (ENV_DATABASE_URL, "")]))
            .unwrap();
        assert!(config.machine_id.starts_with("relay-"));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn rejects_bad_addr_and_buffer() {
        assert!(RelayConfig::from_lookup(lookup(&[(ENV_HTTP_ADDR, "nowhere")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(ENV_ERROR_BUFFER, "0")])).is_err());
    }
}
