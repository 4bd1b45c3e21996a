//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::*;
use crate::session::SessionConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Size of each connection's packet memory pool
    pub pool_capacity: usize,

    /// Handshake must complete within this time
    pub init_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Per-connection session settings
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            pool_capacity: DEFAULT_POOL_CAPACITY,
            init_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Important for low latency
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection pool size
    pub fn pool_capacity(mut self, bytes: usize) -> Self {
        self.pool_capacity = bytes.max(1);
        self
    }

    /// Set handshake timeout
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Drop connections whose packets wait longer than `latency`
    pub fn max_send_latency(mut self, latency: Duration) -> Self {
        self.session = self.session.max_send_latency(latency);
        self
    }

    /// Set the session settings
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}
