//! Connection State

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Live connection state for one upstream.
///
/// Mutated only by transport event callbacks, request handlers on
/// connection-class errors, and the periodic SSE readiness probe.
#[derive(Debug)]
pub struct ConnectionState {
    server_name: String,
    connected: AtomicBool,
    /// Edge-trigger flag: the disconnect transition is logged once per
    /// epoch and the flag clears on the next successful connect.
    error_logged: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ConnectionState {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            connected: AtomicBool::new(false),
            error_logged: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("state lock poisoned").clone()
    }

    /// Record a successful connect: clears the captured error and
    /// re-arms the disconnect log edge trigger.
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.error_logged.store(false, Ordering::Release);
        *self.last_error.lock().expect("state lock poisoned") = None;
        info!("Upstream '{}' connected", self.server_name);
    }

    /// Record a disconnect and capture the error. The transition is
    /// logged only on the first call per disconnect epoch.
    pub fn mark_disconnected(&self, error: impl Into<String>) {
        let error = error.into();
        self.connected.store(false, Ordering::Release);
        *self.last_error.lock().expect("state lock poisoned") = Some(error.clone());

        if !self.error_logged.swap(true, Ordering::AcqRel) {
            warn!("Upstream '{}' disconnected: {}", self.server_name, error);
        }
    }

    /// Capture an error observation without demoting the connection.
    pub fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock().expect("state lock poisoned") = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_clears_error() {
        let state = ConnectionState::new("a");
        state.mark_disconnected("Connection refused");
        assert!(!state.is_connected());
        assert_eq!(state.last_error().as_deref(), Some("Connection refused"));

        state.mark_connected();
        assert!(state.is_connected());
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_disconnect_edge_trigger_rearms_on_connect() {
        let state = ConnectionState::new("a");

        state.mark_disconnected("first");
        assert!(state.error_logged.load(Ordering::Acquire));
        // Second disconnect in the same epoch keeps the flag set
        state.mark_disconnected("second");
        assert!(state.error_logged.load(Ordering::Acquire));

        state.mark_connected();
        assert!(!state.error_logged.load(Ordering::Acquire));
    }

    #[test]
    fn test_record_error_keeps_connection_up() {
        let state = ConnectionState::new("a");
        state.mark_connected();
        state.record_error("stream hiccup");
        assert!(state.is_connected());
        assert_eq!(state.last_error().as_deref(), Some("stream hiccup"));
    }
}
