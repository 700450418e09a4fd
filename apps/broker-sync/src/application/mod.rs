//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (sockets, timers, token service).
pub mod ports;

/// Application services coordinating broker-account connections.
pub mod services;
