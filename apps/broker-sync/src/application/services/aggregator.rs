//! Multi-Connection Aggregator
//!
//! Owns one [`SyncConnection`] per broker account, merges their entity sets
//! and fans the merged view out to subscribers.
//!
//! A merge-and-notify pass runs whenever any connection reports an update,
//! plus on a periodic tick so a missed or coalesced update still produces a
//! fresh notification. Passes are serialized; the merged lists are the
//! per-connection lists concatenated in broker-account-id order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;

use crate::application::ports::{
    ConnectionFactory, Scheduler, SyncConnection, TimerSlot, TokenSource, UpdateCallback,
};
use crate::domain::connection::{BrokerAccountId, ConnectionCredentials, ConnectionStatus};
use crate::domain::entities::{AccountBalance, MergedSnapshot, Order, Position};
use crate::domain::subscription::{Subscription, SubscriptionRegistry};
use crate::infrastructure::metrics;

/// Aggregator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Interval of the safety-net merge-and-notify tick.
    pub tick_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
struct AggregatorState {
    user_id: Option<String>,
    connections: BTreeMap<BrokerAccountId, Arc<dyn SyncConnection>>,
    tick: TimerSlot,
    generation: u64,
}

struct AggregatorInner {
    factory: Arc<dyn ConnectionFactory>,
    scheduler: Arc<dyn Scheduler>,
    config: AggregatorConfig,
    self_ref: Weak<Self>,
    state: Mutex<AggregatorState>,
    registry: SubscriptionRegistry,
    snapshot_tx: watch::Sender<Arc<MergedSnapshot>>,
    notify_lock: ReentrantMutex<()>,
}

/// Merges every broker-account connection of one user.
///
/// Cheap to clone; clones share the same connections and subscribers.
#[derive(Clone)]
pub struct SyncAggregator {
    inner: Arc<AggregatorInner>,
}

impl SyncAggregator {
    /// Create an aggregator with no connections.
    #[must_use]
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        scheduler: Arc<dyn Scheduler>,
        config: AggregatorConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(MergedSnapshot::default()));
        let inner = Arc::new_cyclic(|self_ref| AggregatorInner {
            factory,
            scheduler,
            config,
            self_ref: self_ref.clone(),
            state: Mutex::new(AggregatorState::default()),
            registry: SubscriptionRegistry::new(),
            snapshot_tx,
            notify_lock: ReentrantMutex::new(()),
        });
        Self { inner }
    }

    /// Make the managed set of connections match `credentials`.
    ///
    /// Connections whose account is absent are disconnected and discarded.
    /// New accounts get a connection that starts connecting immediately.
    /// Connections that persist stay connected and have their update
    /// callback rewired. One merge-and-notify pass runs before returning.
    pub fn connect_all(&self, user_id: &str, credentials: Vec<ConnectionCredentials>) {
        self.apply_connection_set(user_id, credentials, &BTreeSet::new());
    }

    /// `connect_all`, except that accounts in `retained` keep their existing
    /// connection even though no credentials were supplied for them.
    fn apply_connection_set(
        &self,
        user_id: &str,
        credentials: Vec<ConnectionCredentials>,
        retained: &BTreeSet<BrokerAccountId>,
    ) {
        let inner = &self.inner;
        let (removed, added) = {
            let mut state = inner.state.lock();
            state.user_id = Some(user_id.to_string());

            let desired: Vec<&str> = credentials
                .iter()
                .map(|c| c.broker_account_id.as_str())
                .collect();
            let stale: Vec<BrokerAccountId> = state
                .connections
                .keys()
                .filter(|id| !desired.contains(&id.as_str()) && !retained.contains(*id))
                .cloned()
                .collect();
            let removed: Vec<Arc<dyn SyncConnection>> = stale
                .iter()
                .filter_map(|id| state.connections.remove(id))
                .collect();

            let mut added = Vec::new();
            let mut seen = BTreeSet::new();
            for credential in credentials {
                let account = credential.broker_account_id.clone();
                if !seen.insert(account.clone()) {
                    tracing::warn!(broker_account_id = %account, "Duplicate credentials ignored");
                    continue;
                }
                if let Some(existing) = state.connections.get(&account) {
                    existing.set_update_callback(inner.update_callback());
                    continue;
                }

                let connection = inner.factory.create(credential);
                connection.set_update_callback(inner.update_callback());
                state.connections.insert(account, Arc::clone(&connection));
                added.push(connection);
            }

            if !state.tick.is_armed() {
                inner.arm_tick(&mut state);
            }

            tracing::info!(
                user_id,
                connections = state.connections.len(),
                added = added.len(),
                removed = removed.len(),
                "Connection set updated"
            );
            (removed, added)
        };

        for connection in &removed {
            connection.disconnect();
        }
        for connection in &added {
            connection.connect();
        }
        inner.merge_and_notify();
    }

    /// Fetch credentials for every account through `token_source`, then
    /// [`connect_all`](Self::connect_all) with the ones that succeeded.
    ///
    /// An account whose fetch fails keeps any connection it already has;
    /// it simply does not start if it had none. Returns the account ids
    /// whose credentials could not be fetched.
    pub async fn connect_user(
        &self,
        user_id: &str,
        broker_account_ids: &[BrokerAccountId],
        token_source: &dyn TokenSource,
    ) -> Vec<BrokerAccountId> {
        let results = join_all(
            broker_account_ids
                .iter()
                .map(|account| token_source.fetch_credentials(user_id, account)),
        )
        .await;

        let mut credentials = Vec::new();
        let mut failed = Vec::new();
        let mut retained = BTreeSet::new();
        for (account, result) in broker_account_ids.iter().zip(results) {
            match result {
                Ok(credential) => credentials.push(credential),
                Err(e) => {
                    tracing::warn!(
                        broker_account_id = %account,
                        error = %e,
                        "Failed to fetch websocket credentials"
                    );
                    failed.push(account.clone());
                    retained.insert(account.clone());
                }
            }
        }

        self.apply_connection_set(user_id, credentials, &retained);
        failed
    }

    /// Disconnect and discard every connection, stop the tick and publish
    /// an empty snapshot. Subscribers stay registered.
    pub fn disconnect_all(&self) {
        let inner = &self.inner;
        let connections = {
            let mut state = inner.state.lock();
            state.tick.cancel();
            state.generation += 1;
            std::mem::take(&mut state.connections)
        };

        for connection in connections.values() {
            connection.disconnect();
        }
        if !connections.is_empty() {
            tracing::info!(connections = connections.len(), "All connections disconnected");
        }
        inner.publish(Arc::new(MergedSnapshot::default()), Instant::now());
    }

    /// Register a position listener, replayed synchronously with the
    /// current positions.
    pub fn on_positions<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Position]) + Send + Sync + 'static,
    {
        let _serial = self.inner.notify_lock.lock();
        self.inner.registry.on_positions(listener)
    }

    /// Register an order listener, replayed synchronously with the current
    /// orders.
    pub fn on_orders<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Order]) + Send + Sync + 'static,
    {
        let _serial = self.inner.notify_lock.lock();
        self.inner.registry.on_orders(listener)
    }

    /// Register an account listener, replayed synchronously with the
    /// current balances.
    pub fn on_accounts<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[AccountBalance]) + Send + Sync + 'static,
    {
        let _serial = self.inner.notify_lock.lock();
        self.inner.registry.on_accounts(listener)
    }

    /// Most recently published merged snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MergedSnapshot> {
        Arc::clone(&self.inner.snapshot_tx.borrow())
    }

    /// Receiver that always holds the latest merged snapshot.
    #[must_use]
    pub fn snapshot_rx(&self) -> watch::Receiver<Arc<MergedSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Status of every managed connection, keyed by broker account id.
    #[must_use]
    pub fn connection_states(&self) -> BTreeMap<BrokerAccountId, ConnectionStatus> {
        self.inner
            .connections()
            .into_iter()
            .map(|c| (c.broker_account_id().to_string(), c.status()))
            .collect()
    }

    /// Status of one connection.
    #[must_use]
    pub fn connection_status(&self, broker_account_id: &str) -> Option<ConnectionStatus> {
        self.inner
            .state
            .lock()
            .connections
            .get(broker_account_id)
            .map(|c| c.status())
    }

    /// Number of managed connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// User passed to the last `connect_all`.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.inner.state.lock().user_id.clone()
    }

    /// Subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Run one merge-and-notify pass now.
    pub fn refresh(&self) {
        self.inner.merge_and_notify();
    }
}

impl std::fmt::Debug for SyncAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAggregator")
            .field("config", &self.inner.config)
            .field("connections", &self.connection_count())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl AggregatorInner {
    fn connections(&self) -> Vec<Arc<dyn SyncConnection>> {
        self.state.lock().connections.values().cloned().collect()
    }

    fn update_callback(&self) -> UpdateCallback {
        let weak = self.self_ref.clone();
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.merge_and_notify();
            }
        })
    }

    fn arm_tick(&self, state: &mut AggregatorState) {
        let generation = state.generation;
        let weak = self.self_ref.clone();
        let handle = self.scheduler.after(
            self.config.tick_interval,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_tick(generation);
                }
            }),
        );
        state.tick.arm(handle);
    }

    fn on_tick(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.tick.release();
            self.arm_tick(&mut state);
        }
        self.merge_and_notify();
    }

    fn merge_and_notify(&self) {
        let _serial = self.notify_lock.lock();
        let started = Instant::now();

        let mut merged = MergedSnapshot::default();
        for connection in self.connections() {
            merged.extend(connection.snapshot());
        }
        self.publish(Arc::new(merged), started);
    }

    fn publish(&self, snapshot: Arc<MergedSnapshot>, started: Instant) {
        let _serial = self.notify_lock.lock();
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        let report = self.registry.notify_shared(snapshot);
        if report.panicked > 0 {
            tracing::warn!(
                delivered = report.delivered,
                panicked = report.panicked,
                "Subscriber listeners panicked during fan-out"
            );
        }
        metrics::record_notification(report.delivered, report.panicked, started.elapsed());
    }
}
