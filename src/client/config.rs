//! Client configuration

use std::time::Duration;

use crate::protocol::message::ClientType;
use crate::session::SessionConfig;

/// Streaming client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub addr: String,

    /// Role requested during the handshake
    pub client_type: ClientType,

    /// Timeout for TCP connect plus handshake
    pub connect_timeout: Duration,

    /// Pause between reconnection attempts
    pub reconnect_interval: Duration,

    /// Attempts before giving up (0 = never reconnect)
    pub max_reconnect_attempts: u32,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Session settings
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Create a config for the given `host:port`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_type: ClientType::Control,
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_attempts: 10,
            tcp_nodelay: true,
            session: SessionConfig::default(),
        }
    }

    /// Set the requested client type
    pub fn client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = client_type;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set reconnection policy
    pub fn reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set the session settings
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Connection id used to tell streaming sources apart
    pub fn connection_id(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
