//! Bounded retry with exponential backoff.
//!
//! The policy is a pure attempt-to-delay function plus limits, so the
//! retry state machine is testable with no I/O behind it.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickvault_core::{CoreError, CoreResult};

/// Retry limits and backoff shape for flush commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before FlushFailure (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base delay (ms); attempt N waits base * factor^(N-1).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: u32,
    /// Backoff ceiling (ms).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-attempt deadline (ms) on the store commit.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Add 0-1000 ms of jitter to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// A zero-delay policy for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            factor: 2,
            max_delay_ms: 0,
            attempt_timeout_ms: 30_000,
            jitter: false,
        }
    }

    /// Reject nonsense policies at configuration time.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::Configuration(
                "retry policy: max_attempts must be at least 1".into(),
            ));
        }
        if self.factor == 0 {
            return Err(CoreError::Configuration(
                "retry policy: backoff factor must be at least 1".into(),
            ));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(CoreError::Configuration(
                "retry policy: attempt timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retrying after failed attempt `attempt` (1-based):
    /// base * factor^(attempt-1), capped, plus jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = u64::from(self.factor).saturating_pow(exponent);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let jitter = if self.jitter { subsec_jitter() } else { 0 };
        Duration::from_millis(delay + jitter)
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Jitter (0-1000 ms) from the wall clock's subsecond nanos.
fn subsec_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos % 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(30), Duration::from_millis(60_000));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default();
        let base = Duration::from_millis(1000);
        for _ in 0..10 {
            let d = policy.delay_for(1);
            assert!(d >= base);
            assert!(d < base + Duration::from_millis(1001));
        }
    }

    #[test]
    fn test_invalid_policies_rejected() {
        let mut policy = RetryPolicy::default();
        policy.max_attempts = 0;
        assert!(policy.validate().is_err());

        let mut policy = RetryPolicy::default();
        policy.factor = 0;
        assert!(policy.validate().is_err());

        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_immediate_policy_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(5), Duration::ZERO);
    }
}
