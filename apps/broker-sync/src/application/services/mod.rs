//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SyncAggregator`: Owns one connection per broker account and fans the
//!   merged entity sets out to subscribers

pub mod aggregator;

pub use aggregator::{AggregatorConfig, SyncAggregator};
