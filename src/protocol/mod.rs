//! Protocol Module
//!
//! MCP method names and the JSON-RPC message types spoken on both the
//! downstream and upstream sides of the proxy.

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
