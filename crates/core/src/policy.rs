//! Retry policy for failed deliveries.

use serde::{Deserialize, Serialize};

/// Governs whether, and after how many attempts, a record stops being retried.
///
/// When disabled, delivery is retried on every processing tick indefinitely.
/// There is no per-record backoff timer: a failing send aborts the current
/// batch, so the processing interval itself spaces the retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrialPolicy {
    pub max_attempts_enabled: bool,
    pub max_attempts: u32,
}

impl Default for RetrialPolicy {
    fn default() -> Self {
        Self {
            max_attempts_enabled: false,
            max_attempts: 5,
        }
    }
}

impl RetrialPolicy {
    /// Retry forever.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Give up after `max_attempts` failed sends.
    pub fn max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts_enabled: true,
            max_attempts,
        }
    }

    /// Whether a record with `attempt_count` attempts behind it is exhausted.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        self.max_attempts_enabled && attempt_count >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_policy_never_exhausts() {
        let policy = RetrialPolicy::unlimited();
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(u32::MAX));
    }

    #[test]
    fn enabled_policy_exhausts_at_max() {
        let policy = RetrialPolicy::max_attempts(3);
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
