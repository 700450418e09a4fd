//! Domain Layer - Broker entities and synchronization rules.
//!
//! This layer contains the entity types, the per-connection reconciler and
//! the listener registry. Nothing here performs I/O.

/// Positions, orders, balances and the merged snapshot.
pub mod entities;

/// Connection state machine states, status and credentials.
pub mod connection;

/// Event-to-snapshot reconciliation.
pub mod reconciler;

/// Listener registry with replay-on-subscribe.
pub mod subscription;
