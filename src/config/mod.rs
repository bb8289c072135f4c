//! Configuration Module
//!
//! Loads and validates `config.json`.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;
