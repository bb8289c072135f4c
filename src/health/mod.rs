//! Health Module
//!
//! Periodic liveness inspection of the upstream fleet. Catches silent
//! connection loss the transport callbacks missed and keeps the metrics
//! store's health bit authoritative.

pub mod monitor;
pub mod types;

pub use monitor::HealthMonitor;
pub use types::{HealthCheck, HealthSummary};
