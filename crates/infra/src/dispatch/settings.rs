//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use outbox_core::RetrialPolicy;

pub const ENV_PROCESS_INTERVAL_MS: &str = "OUTBOX_PROCESS_INTERVAL_MS";
pub const ENV_LOCK_CHECK_INTERVAL_MS: &str = "OUTBOX_LOCK_CHECK_INTERVAL_MS";
pub const ENV_CLEANUP_INTERVAL_MS: &str = "OUTBOX_CLEANUP_INTERVAL_MS";
pub const ENV_MAX_LOCK_DURATION_MS: &str = "OUTBOX_MAX_LOCK_DURATION_MS";
pub const ENV_RETENTION_MS: &str = "OUTBOX_RETENTION_MS";
pub const ENV_MAX_ATTEMPTS: &str = "OUTBOX_MAX_ATTEMPTS";

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidVar {
        var: String,
        value: String,
        reason: String,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Timing and retry configuration of a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// How often the processor claims and delivers pending records.
    pub process_interval: Duration,
    /// How often the unlocker looks for stale claims.
    pub lock_checker_interval: Duration,
    /// How often the cleaner purges old terminal records.
    pub cleanup_interval: Duration,
    /// A claim older than this is considered abandoned.
    pub max_lock_duration: Duration,
    /// Terminal records older than this are deleted.
    pub retention_duration: Duration,
    pub retrial_policy: RetrialPolicy,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_secs(1),
            lock_checker_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60 * 60),
            max_lock_duration: Duration::from_secs(5 * 60),
            retention_duration: Duration::from_secs(7 * 24 * 60 * 60),
            retrial_policy: RetrialPolicy::default(),
        }
    }
}

impl DispatcherSettings {
    /// Load settings from `OUTBOX_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(d) = millis(&lookup, ENV_PROCESS_INTERVAL_MS)? {
            settings.process_interval = d;
        }
        if let Some(d) = millis(&lookup, ENV_LOCK_CHECK_INTERVAL_MS)? {
            settings.lock_checker_interval = d;
        }
        if let Some(d) = millis(&lookup, ENV_CLEANUP_INTERVAL_MS)? {
            settings.cleanup_interval = d;
        }
        if let Some(d) = millis(&lookup, ENV_MAX_LOCK_DURATION_MS)? {
            settings.max_lock_duration = d;
        }
        if let Some(d) = millis(&lookup, ENV_RETENTION_MS)? {
            settings.retention_duration = d;
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            let max_attempts = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid_var(ENV_MAX_ATTEMPTS, &raw, e))?;
            settings.retrial_policy = RetrialPolicy::max_attempts(max_attempts);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn with_retrial_policy(mut self, policy: RetrialPolicy) -> Self {
        self.retrial_policy = policy;
        self
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, d) in [
            ("process_interval", self.process_interval),
            ("lock_checker_interval", self.lock_checker_interval),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if d.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        for (name, d) in [
            ("max_lock_duration", self.max_lock_duration),
            ("retention_duration", self.retention_duration),
        ] {
            if chrono::Duration::from_std(d).is_err() {
                return Err(ConfigError::Invalid(format!("{name} is out of range")));
            }
        }

        if self.retrial_policy.max_attempts_enabled && self.retrial_policy.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1 when enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn millis<F>(lookup: &F, var: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| invalid_var(var, &raw, e)),
    }
}

fn invalid_var(var: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidVar {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
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
    fn defaults_are_valid() {
        let settings = DispatcherSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.process_interval, Duration::from_secs(1));
        assert!(!settings.retrial_policy.max_attempts_enabled);
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let settings = DispatcherSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, DispatcherSettings::default());
    }

    #[test]
    fn overrides_are_applied() {
        let settings = DispatcherSettings::from_lookup(lookup(&[
            (ENV_PROCESS_INTERVAL_MS, "250"),
            (ENV_LOCK_CHECK_INTERVAL_MS, "1000"),
            (ENV_CLEANUP_INTERVAL_MS, "2000"),
            (ENV_MAX_LOCK_DURATION_MS, "3000"),
            (ENV_RETENTION_MS, "4000"),
            (ENV_MAX_ATTEMPTS, "3"),
        ]))
        .unwrap();

        assert_eq!(settings.process_interval, Duration::from_millis(250));
        assert_eq!(settings.lock_checker_interval, Duration::from_secs(1));
        assert_eq!(settings.cleanup_interval, Duration::from_secs(2));
        assert_eq!(settings.max_lock_duration, Duration::from_secs(3));
        assert_eq!(settings.retention_duration, Duration::from_secs(4));
        assert_eq!(settings.retrial_policy, RetrialPolicy::max_attempts(3));
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = DispatcherSettings::from_lookup(lookup(&[(ENV_PROCESS_INTERVAL_MS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { ref var, .. } if var == ENV_PROCESS_INTERVAL_MS));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = DispatcherSettings::from_lookup(lookup(&[(ENV_CLEANUP_INTERVAL_MS, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn enabled_zero_max_attempts_is_rejected() {
        let settings =
            DispatcherSettings::default().with_retrial_policy(RetrialPolicy::max_attempts(0));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let settings: DispatcherSettings = serde_json::from_str(
            r#"{ "retrial_policy": { "max_attempts_enabled": true, "max_attempts": 2 } }"#,
        )
        .unwrap();
        assert_eq!(settings.retrial_policy, RetrialPolicy::max_attempts(2));
        assert_eq!(settings.cleanup_interval, Duration::from_secs(3600));
    }
}
