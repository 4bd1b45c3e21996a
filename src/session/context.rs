//! Connection context
//!
//! Snapshot of a server connection handed out to callers that want to
//! inspect who is connected.

use std::net::SocketAddr;

use crate::protocol::message::ClientType;
use crate::stats::SessionStats;

/// Read-only view of one connection
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Client type, once the handshake admitted the connection
    pub client_type: Option<ClientType>,

    /// Session statistics at the time of the snapshot
    pub stats: SessionStats,
}

impl SessionContext {
    /// Create a new context
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            client_type: None,
            stats: SessionStats::default(),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.client_type.is_some()
    }

    /// Whether the client may change device state
    pub fn has_control(&self) -> bool {
        matches!(
            self.client_type,
            Some(ClientType::Control) | Some(ClientType::ExclusiveControl)
        )
    }
}
