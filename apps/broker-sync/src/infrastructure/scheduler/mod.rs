//! Scheduler Adapters
//!
//! [`TokioScheduler`] runs timers on the tokio runtime. [`ManualScheduler`]
//! keeps a fake clock that only moves when [`ManualScheduler::advance`] is
//! called, which makes heartbeat, settle, reconnect and aggregation timing
//! deterministic in tests.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::application::ports::{ScheduledTask, Scheduler, TimerHandle};

// =============================================================================
// Tokio Scheduler
// =============================================================================

/// Scheduler backed by `tokio::time::sleep` on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Create a scheduler that spawns timers on `runtime`.
    #[must_use]
    pub const fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: ScheduledTask) -> TimerHandle {
        let timer = TimerHandle::new();
        let token = timer.token().clone();

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        task();
                    }
                }
            }
        });

        timer
    }
}

// =============================================================================
// Manual Scheduler
// =============================================================================

struct PendingTask {
    timer: TimerHandle,
    task: ScheduledTask,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    sequence: u64,
    queue: BTreeMap<(Duration, u64), PendingTask>,
}

/// Fake-clock scheduler for tests.
///
/// Tasks due at the same instant run in scheduling order. Tasks run without
/// the scheduler lock held, so they may schedule further tasks.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// use broker_sync::application::ports::Scheduler;
/// use broker_sync::infrastructure::scheduler::ManualScheduler;
///
/// let scheduler = ManualScheduler::new();
/// let fired = Arc::new(AtomicU32::new(0));
/// let counter = Arc::clone(&fired);
/// scheduler.after(
///     Duration::from_millis(500),
///     Box::new(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }),
/// );
///
/// scheduler.advance(Duration::from_millis(499));
/// assert_eq!(fired.load(Ordering::SeqCst), 0);
/// scheduler.advance(Duration::from_millis(1));
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    /// Create a scheduler at time zero with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Elapsed fake time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Number of tasks still due to run (cancelled ones excluded).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.clock
            .lock()
            .queue
            .values()
            .filter(|pending| !pending.timer.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, running every task that falls due in
    /// order. Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;

        loop {
            let next = {
                let mut clock = self.clock.lock();
                let due = clock
                    .queue
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(at, _)| *at <= target);
                due.and_then(|key| {
                    clock.now = key.0;
                    clock.queue.remove(&key)
                })
            };

            let Some(pending) = next else { break };
            if !pending.timer.is_cancelled() {
                (pending.task)();
                ran += 1;
            }
        }

        self.clock.lock().now = target;
        ran
    }

    /// Run tasks due at the current instant without moving the clock.
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: ScheduledTask) -> TimerHandle {
        let timer = TimerHandle::new();
        let mut clock = self.clock.lock();
        let key = (clock.now + delay, clock.sequence);
        clock.sequence += 1;
        clock.queue.insert(
            key,
            PendingTask {
                timer: timer.clone(),
                task,
            },
        );
        timer
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clock = self.clock.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &clock.now)
            .field("queued", &clock.queue.len())
            .finish()
    }
}
