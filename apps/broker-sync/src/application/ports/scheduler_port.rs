//! Scheduler Port (Driven Port)
//!
//! Delayed one-shot tasks with cancellation. Every heartbeat, settle,
//! reconnect and aggregation timer goes through this port so tests can
//! drive time by hand.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A task run once when its timer fires.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancelable handle to one scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Create a handle that is not yet cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the task. A task that already ran is unaffected.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether `cancel` was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token adapters select on to abandon the wait.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Port for scheduling delayed tasks.
///
/// Implementations must never run `task` synchronously inside `after`;
/// callers may hold locks while scheduling.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay` unless the returned handle is cancelled
    /// first.
    fn after(&self, delay: Duration, task: ScheduledTask) -> TimerHandle;
}

/// Holds at most one armed timer; arming a new one cancels the old one.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<TimerHandle>,
}

impl TimerSlot {
    /// Create an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Store `handle`, cancelling any timer already held.
    pub fn arm(&mut self, handle: TimerHandle) {
        if let Some(previous) = self.handle.replace(handle) {
            previous.cancel();
        }
    }

    /// Cancel and forget the held timer. Returns whether one was held.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the held timer without cancelling it (it has fired).
    pub fn release(&mut self) {
        self.handle = None;
    }

    /// Whether a live timer is held.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_cancelled())
    }
}
