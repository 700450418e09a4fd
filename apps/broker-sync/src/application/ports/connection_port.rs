//! Connection Port (Driven Port)
//!
//! What the aggregator needs from one broker-account connection, and how it
//! creates them.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::connection::{ConnectionCredentials, ConnectionStatus};
use crate::domain::entities::MergedSnapshot;

/// Called after every reconciler mutation or refresh trigger.
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// One synchronized broker-account connection.
pub trait SyncConnection: Send + Sync {
    /// Account this connection serves.
    fn broker_account_id(&self) -> &str;

    /// Start connecting. No-op when already connecting or connected.
    fn connect(&self);

    /// Tear down: cancel timers, close the socket, clear the entity sets.
    /// Idempotent.
    fn disconnect(&self);

    /// Replace the update callback.
    fn set_update_callback(&self, callback: UpdateCallback);

    /// Consistent copy of the live entity sets.
    fn snapshot(&self) -> MergedSnapshot;

    /// Current status.
    fn status(&self) -> ConnectionStatus;

    /// Status updates.
    fn status_rx(&self) -> watch::Receiver<ConnectionStatus>;
}

/// Creates connections from credentials.
pub trait ConnectionFactory: Send + Sync {
    /// Build a connection; it does not connect until `connect` is called.
    fn create(&self, credentials: ConnectionCredentials) -> Arc<dyn SyncConnection>;
}
