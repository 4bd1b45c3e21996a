//! Client admission
//!
//! Decides whether a connection may stay after it states its client type.
//! Rejection happens before any per-connection signal state exists, so
//! admitted connections never observe a rejected one.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::protocol::message::{ClientType, RejectReason};

/// Tracks admitted connections by client type
#[derive(Debug)]
pub struct ClientAdmission {
    max_connections: usize,
    clients: Mutex<HashMap<u64, ClientType>>,
}

impl ClientAdmission {
    /// `max_connections` of 0 means unlimited
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a connection or tell why not
    pub fn admit(&self, connection_id: u64, client_type: ClientType) -> Result<(), RejectReason> {
        let mut clients = self.clients.lock();

        if self.max_connections > 0 && clients.len() >= self.max_connections {
            return Err(RejectReason::ConnectionLimit);
        }

        let control = clients.values().filter(|t| **t == ClientType::Control).count();
        let exclusive = clients
            .values()
            .filter(|t| **t == ClientType::ExclusiveControl)
            .count();

        let conflict = match client_type {
            ClientType::ExclusiveControl => control + exclusive > 0,
            ClientType::Control => exclusive > 0,
            ClientType::ViewOnly => false,
        };
        if conflict {
            return Err(RejectReason::ControlRejected);
        }

        clients.insert(connection_id, client_type);
        Ok(())
    }

    /// Forget a connection; unknown ids are ignored
    pub fn release(&self, connection_id: u64) {
        self.clients.lock().remove(&connection_id);
    }

    /// Number of admitted connections
    pub fn admitted(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn client_type(&self, connection_id: u64) -> Option<ClientType> {
        self.clients.lock().get(&connection_id).copied()
    }
}
