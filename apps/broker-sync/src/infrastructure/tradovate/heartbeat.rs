//! Heartbeat Timer
//!
//! Tradovate expects the client to send `[]` at a fixed interval while the
//! socket is open. The timer is a self-rescheduling one-shot held in a
//! [`TimerSlot`], so re-arming always cancels the previous firing and the
//! heartbeat is never double-scheduled.

use std::time::Duration;

use crate::application::ports::{TimerHandle, TimerSlot};
use crate::infrastructure::config::ConnectionSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between client heartbeats.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with a custom interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Create configuration from `ConnectionSettings`.
    #[must_use]
    pub const fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
        }
    }
}

/// Heartbeat timer for one connection.
#[derive(Debug, Default)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    slot: TimerSlot,
    sent: u64,
}

impl Heartbeat {
    /// Create a stopped heartbeat.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            slot: TimerSlot::new(),
            sent: 0,
        }
    }

    /// Interval until the next firing.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Hold the timer for the next firing, cancelling any earlier one.
    pub fn arm(&mut self, handle: TimerHandle) {
        self.slot.arm(handle);
    }

    /// Cancel the pending firing. Returns whether the heartbeat was running.
    pub fn stop(&mut self) -> bool {
        self.slot.cancel()
    }

    /// Whether a firing is pending.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot.is_armed()
    }

    /// Record one `[]` sent to the server.
    pub const fn record_sent(&mut self) {
        self.sent = self.sent.saturating_add(1);
    }

    /// Heartbeats sent since the connection was created.
    #[must_use]
    pub const fn sent_count(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_is_25_seconds() {
        assert_eq!(HeartbeatConfig::default().interval, Duration::from_secs(25));
    }

    #[test]
    fn config_from_settings() {
        let settings = ConnectionSettings {
            heartbeat_interval: Duration::from_secs(5),
            ..ConnectionSettings::default()
        };
        assert_eq!(
            HeartbeatConfig::from_settings(&settings).interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn rearming_cancels_previous_firing() {
        let mut heartbeat = Heartbeat::new(HeartbeatConfig::default());
        let first = TimerHandle::new();
        let second = TimerHandle::new();

        heartbeat.arm(first.clone());
        heartbeat.arm(second.clone());

        assert!(first.is_cancelled());
        assert!(heartbeat.is_running());

        assert!(heartbeat.stop());
        assert!(second.is_cancelled());
        assert!(!heartbeat.is_running());
        assert!(!heartbeat.stop());
    }

    #[test]
    fn counts_sent_heartbeats() {
        let mut heartbeat = Heartbeat::default();
        heartbeat.record_sent();
        heartbeat.record_sent();
        assert_eq!(heartbeat.sent_count(), 2);
    }
}
