//! Subscription Registry
//!
//! Listener sets for positions, orders and account balances.
//!
//! # Design
//!
//! The registry tracks:
//! - Listeners per entity kind, called in registration order
//! - The last merged snapshot, replayed to every new listener before
//!   `on_*` returns
//! - Listener panics, which are caught so one faulty listener cannot starve
//!   the others
//!
//! Registration with its replay and each notify round run under one
//! reentrant fan-out guard, so a replay never lands after a newer snapshot.
//! Listener sets are not locked while a listener runs; listeners may
//! subscribe or unsubscribe from inside their own callback.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::domain::entities::{AccountBalance, MergedSnapshot, Order, Position};

// =============================================================================
// Types
// =============================================================================

/// Identifier of one registered listener, unique per registry.
pub type ListenerId = u64;

/// Callback receiving the full current list of one entity kind.
pub type Listener<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

/// Entity kind a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Live positions.
    Positions,
    /// Live orders.
    Orders,
    /// Account balances.
    Accounts,
}

impl SubscriptionKind {
    /// Get all kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Positions, Self::Orders, Self::Accounts]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positions => "positions",
            Self::Orders => "orders",
            Self::Accounts => "accounts",
        }
    }
}

// =============================================================================
// Listener Set (per kind)
// =============================================================================

struct ListenerSet<T> {
    listeners: RwLock<BTreeMap<ListenerId, Listener<T>>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> ListenerSet<T> {
    fn insert(&self, id: ListenerId, listener: Listener<T>) {
        self.listeners.write().insert(id, listener);
    }

    fn remove(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.listeners.read().len()
    }

    fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Call every listener with `items`, returning how many panicked.
    fn deliver(&self, kind: SubscriptionKind, items: &[T]) -> (usize, usize) {
        let listeners: Vec<(ListenerId, Listener<T>)> = self
            .listeners
            .read()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        let mut panicked = 0;
        for (id, listener) in &listeners {
            if !invoke(kind, *id, listener, items) {
                panicked += 1;
            }
        }
        (listeners.len(), panicked)
    }
}

fn invoke<T>(kind: SubscriptionKind, id: ListenerId, listener: &Listener<T>, items: &[T]) -> bool {
    match catch_unwind(AssertUnwindSafe(|| listener(items))) {
        Ok(()) => true,
        Err(_) => {
            tracing::error!(
                kind = kind.as_str(),
                listener_id = id,
                "Subscriber listener panicked"
            );
            false
        }
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Handle returned by `on_*`; `unsubscribe` may be called any number of times.
///
/// Dropping the handle keeps the listener registered.
pub struct Subscription {
    id: ListenerId,
    kind: SubscriptionKind,
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(id: ListenerId, kind: SubscriptionKind, remove: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            id,
            kind,
            remove: Mutex::new(Some(remove)),
        }
    }

    /// Remove the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let remove = self.remove.lock().take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Whether `unsubscribe` has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.remove.lock().is_some()
    }

    /// Listener id.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Kind this subscription listens to.
    #[must_use]
    pub const fn kind(&self) -> SubscriptionKind {
        self.kind
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    positions: ListenerSet<Position>,
    orders: ListenerSet<Order>,
    accounts: ListenerSet<AccountBalance>,
    latest: RwLock<Arc<MergedSnapshot>>,
    fanout: ReentrantMutex<()>,
    next_id: AtomicU64,
    panics: AtomicU64,
}

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Listener invocations attempted.
    pub delivered: usize,
    /// Invocations that panicked.
    pub panicked: usize,
}

/// Listener counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Position listeners.
    pub positions: usize,
    /// Order listeners.
    pub orders: usize,
    /// Account listeners.
    pub accounts: usize,
    /// Listener panics since creation.
    pub panics: u64,
}

impl SubscriptionStats {
    /// Total listeners across kinds.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.positions + self.orders + self.accounts
    }
}

/// Thread-safe registry of snapshot listeners.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use broker_sync::domain::entities::{MergedSnapshot, Position};
/// use broker_sync::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let seen = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&seen);
/// let subscription = registry.on_positions(move |positions: &[Position]| {
///     counter.store(positions.len(), Ordering::SeqCst);
/// });
///
/// registry.notify(&MergedSnapshot {
///     positions: vec![Position::default(), Position::default()],
///     ..MergedSnapshot::default()
/// });
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
///
/// subscription.unsubscribe();
/// subscription.unsubscribe();
/// assert_eq!(registry.stats().positions, 0);
/// ```
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a position listener; it is called once with the current
    /// positions before this returns.
    pub fn on_positions<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Position]) + Send + Sync + 'static,
    {
        let listener: Listener<Position> = Arc::new(listener);
        let id = self.next_id();
        {
            let _fanout = self.inner.fanout.lock();
            self.inner.positions.insert(id, Arc::clone(&listener));
            let latest = self.latest();
            self.replay(SubscriptionKind::Positions, id, &listener, &latest.positions);
        }

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(
            id,
            SubscriptionKind::Positions,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.positions.remove(id);
                }
            }),
        )
    }

    /// Register an order listener; it is called once with the current orders
    /// before this returns.
    pub fn on_orders<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Order]) + Send + Sync + 'static,
    {
        let listener: Listener<Order> = Arc::new(listener);
        let id = self.next_id();
        {
            let _fanout = self.inner.fanout.lock();
            self.inner.orders.insert(id, Arc::clone(&listener));
            let latest = self.latest();
            self.replay(SubscriptionKind::Orders, id, &listener, &latest.orders);
        }

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(
            id,
            SubscriptionKind::Orders,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.orders.remove(id);
                }
            }),
        )
    }

    /// Register an account listener; it is called once with the current
    /// balances before this returns.
    pub fn on_accounts<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[AccountBalance]) + Send + Sync + 'static,
    {
        let listener: Listener<AccountBalance> = Arc::new(listener);
        let id = self.next_id();
        {
            let _fanout = self.inner.fanout.lock();
            self.inner.accounts.insert(id, Arc::clone(&listener));
            let latest = self.latest();
            self.replay(SubscriptionKind::Accounts, id, &listener, &latest.accounts);
        }

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(
            id,
            SubscriptionKind::Accounts,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.accounts.remove(id);
                }
            }),
        )
    }

    /// Store `snapshot` as the latest and deliver it to every listener.
    pub fn notify(&self, snapshot: &MergedSnapshot) -> FanOutReport {
        let _fanout = self.inner.fanout.lock();
        *self.inner.latest.write() = Arc::new(snapshot.clone());
        self.deliver(snapshot)
    }

    /// Store an already shared snapshot and deliver it.
    pub fn notify_shared(&self, snapshot: Arc<MergedSnapshot>) -> FanOutReport {
        let _fanout = self.inner.fanout.lock();
        *self.inner.latest.write() = Arc::clone(&snapshot);
        self.deliver(&snapshot)
    }

    fn deliver(&self, snapshot: &MergedSnapshot) -> FanOutReport {
        let (p_total, p_panicked) = self
            .inner
            .positions
            .deliver(SubscriptionKind::Positions, &snapshot.positions);
        let (o_total, o_panicked) = self
            .inner
            .orders
            .deliver(SubscriptionKind::Orders, &snapshot.orders);
        let (a_total, a_panicked) = self
            .inner
            .accounts
            .deliver(SubscriptionKind::Accounts, &snapshot.accounts);

        let panicked = p_panicked + o_panicked + a_panicked;
        if panicked > 0 {
            self.inner
                .panics
                .fetch_add(panicked as u64, Ordering::Relaxed);
        }

        FanOutReport {
            delivered: p_total + o_total + a_total,
            panicked,
        }
    }

    fn replay<T>(&self, kind: SubscriptionKind, id: ListenerId, listener: &Listener<T>, items: &[T]) {
        if !invoke(kind, id, listener, items) {
            self.inner.panics.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Last snapshot passed to `notify`.
    #[must_use]
    pub fn latest(&self) -> Arc<MergedSnapshot> {
        Arc::clone(&self.inner.latest.read())
    }

    /// Remove every listener.
    pub fn clear_listeners(&self) {
        self.inner.positions.clear();
        self.inner.orders.clear();
        self.inner.accounts.clear();
    }

    /// Listener counts and panic total.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            positions: self.inner.positions.len(),
            orders: self.inner.orders.len(),
            accounts: self.inner.accounts.len(),
            panics: self.inner.panics.load(Ordering::Relaxed),
        }
    }

    fn next_id(&self) -> ListenerId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
