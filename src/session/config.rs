//! Session configuration

use std::time::Duration;

use crate::protocol::constants::MAX_PAYLOAD_SIZE;

/// Per-connection settings shared by client and server sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest payload accepted from the peer; larger payloads are skipped
    pub max_payload_size: u32,

    /// Maximum time a queued packet may wait before the connection is
    /// dropped (None = no deadline)
    pub max_send_latency: Option<Duration>,

    /// How often the driver checks the send deadline
    pub deadline_check_interval: Duration,

    /// Socket read buffer size
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_send_latency: None,
            deadline_check_interval: Duration::from_millis(10),
            read_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl SessionConfig {
    /// Set the payload ceiling (capped at the protocol maximum)
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size.min(MAX_PAYLOAD_SIZE);
        self
    }

    /// Enable the send deadline
    pub fn max_send_latency(mut self, latency: Duration) -> Self {
        self.max_send_latency = Some(latency);
        self
    }

    /// Set the read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}
