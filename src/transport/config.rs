//! Transport configuration.

use std::time::Duration;

use crate::core::constants::{
    DEFAULT_CLOSE_RETRIES, DEFAULT_HANDSHAKE_RETRIES, DEFAULT_MAX_CONNECTIONS, DEFAULT_TIMEOUT,
};

/// Settings shared by every transport an engine builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Deadline of network operations before a session exists. Afterwards
    /// the negotiated ping timeout applies.
    pub default_timeout: Duration,

    /// Concurrent HTTP requests per transport: one receive loop plus
    /// [`send_workers`](Self::send_workers) senders. Also caps the idle
    /// connections the HTTP client keeps.
    pub max_connections: usize,

    /// Retries of a failed handshake request.
    pub handshake_retries: u32,

    /// Retries of the close packet sent on disconnect.
    pub close_retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            handshake_retries: DEFAULT_HANDSHAKE_RETRIES,
            close_retries: DEFAULT_CLOSE_RETRIES,
        }
    }
}

impl TransportConfig {
    /// Number of concurrent send workers: every connection but the one
    /// reserved for receiving, and never fewer than one.
    pub fn send_workers(&self) -> usize {
        self.max_connections.saturating_sub(1).max(1)
    }
}
