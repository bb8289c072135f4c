//! Metrics Module
//!
//! Per-upstream counters, smoothed response times, load factors, and
//! the derived quality scores consumed by the selection strategies.

pub mod store;
pub mod types;

pub use store::MetricsStore;
pub use types::{MetricsRecord, QualityScore};
