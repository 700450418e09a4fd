//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Tradovate user-data adapters (codec, connection, transport, token).
pub mod tradovate;

/// Tokio and fake-clock schedulers.
pub mod scheduler;

/// Configuration from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
