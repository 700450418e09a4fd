//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Scheduler`: Delayed, cancelable tasks
//! - `TransportConnector`: WebSocket connections to the broker
//! - `TokenSource`: Per-account websocket credentials
//! - `ConnectionFactory`: Broker-account connections for the aggregator

mod connection_port;
mod scheduler_port;
mod token_port;
mod transport_port;

pub use connection_port::{ConnectionFactory, SyncConnection, UpdateCallback};
pub use scheduler_port::{ScheduledTask, Scheduler, TimerHandle, TimerSlot};
pub use token_port::{TokenFetchError, TokenSource};
pub use transport_port::{
    NORMAL_CLOSE, TransportConnector, TransportError, TransportEvent, TransportEventSink,
    TransportHandle,
};
