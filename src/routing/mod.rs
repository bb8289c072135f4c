//! Routing Module
//!
//! The name-to-upstream routing tables and the fan-out aggregator that
//! rebuilds them from upstream listings.

pub mod aggregator;
pub mod tables;

pub use aggregator::Aggregator;
pub use tables::{EntityKind, RoutingTables};
