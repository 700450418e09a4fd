//! Reconnection Policy
//!
//! Tradovate user-data sockets come back after a fixed delay. The policy
//! counts attempts since the last time the connection went live and stops
//! handing out delays once an optional cap is reached.

use std::time::Duration;

use crate::infrastructure::config::ConnectionSettings;

/// Delay used when no settings are supplied.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Wait before every reconnection attempt.
    pub delay: Duration,
    /// Maximum attempts between two live periods (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Build from the connection section of the service configuration.
    #[must_use]
    pub const fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            delay: settings.reconnect_delay,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Attempt budget for one connection.
///
/// ```rust
/// use std::time::Duration;
/// use broker_sync::infrastructure::tradovate::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     delay: Duration::from_millis(1500),
///     max_attempts: 1,
/// });
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(1500)));
/// assert_eq!(policy.next_delay(), None);
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts spent.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Spend one attempt and return the wait before it, or `None` once the
    /// cap is exhausted.
    #[must_use]
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        Some(self.config.delay)
    }

    /// Forget spent attempts. Called on reaching Live and on disconnect.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts spent since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt may be scheduled.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }
}
