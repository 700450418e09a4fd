#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Broker Sync - Multi-Account Broker State Synchronizer
//!
//! Maintains one authenticated Tradovate user-data WebSocket per broker
//! account, reconciles position, order and balance events into
//! per-connection entity sets, and fans the merged view out to in-process
//! subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Entities and synchronization rules
//!   - `entities`: Positions, orders, balances, merged snapshot
//!   - `connection`: Connection states, status and credentials
//!   - `reconciler`: Applies Created/Updated/Deleted events
//!   - `subscription`: Listener registry with replay-on-subscribe
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Scheduler, transport, token source, connection factory
//!   - `services`: Multi-connection aggregator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tradovate`: Frame codec, connection state machine, socket tasks,
//!     token service client
//!   - `scheduler`: Tokio and fake-clock timers
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! account A socket ─► codec ─► connection ─► reconciler ─┐
//!                                                        ├─► aggregator ─► listeners
//! account B socket ─► codec ─► connection ─► reconciler ─┘        │
//!                                                                 └─► watch channel
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Broker entities and reconciliation with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    BrokerAccountId, ConnectionCredentials, ConnectionState, ConnectionStatus,
};
pub use domain::entities::{AccountBalance, MergedSnapshot, Order, OrderStatus, Position};
pub use domain::reconciler::{EntityReconciler, EntityType, EventType, SyncEvent};
pub use domain::subscription::{Subscription, SubscriptionRegistry};

// Application
pub use application::ports::{
    ConnectionFactory, Scheduler, SyncConnection, TokenSource, TransportConnector,
};
pub use application::services::{AggregatorConfig, SyncAggregator};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ConnectionSettings, ServerSettings, SyncConfig};

// Tradovate adapters
pub use infrastructure::tradovate::{
    BrokerConnection, HttpTokenSource, TradovateConnectionFactory, TungsteniteConnector,
};

// Schedulers
pub use infrastructure::scheduler::{ManualScheduler, TokioScheduler};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
