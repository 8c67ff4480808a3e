//! Per-connection settings.

use std::time::Duration;

/// How long an outbound call waits for its response unless configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Label attached to the connection's log span.
    pub name: String,
    /// Deadline for each outbound call.
    pub timeout: Duration,
    /// Upper bound on inbound messages dispatched to handlers at once. `None`
    /// runs every message as soon as it is read; `Some(n)` queues requests and
    /// notifications while `n` are still running. Responses are never queued.
    pub max_in_flight: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "conn".to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_in_flight: None,
        }
    }
}
