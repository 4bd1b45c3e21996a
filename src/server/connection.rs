//! Server-side connection
//!
//! Each accepted socket gets a session, a registry for the signals the
//! server publishes to it, and its own packet memory pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::listener::ServerShared;
use crate::pool::{Allocation, AllocationStatus, PacketMemoryPool};
use crate::protocol::constants::PACKET_TYPE_DATA;
use crate::protocol::message::{ClientType, Message, RejectReason};
use crate::protocol::packet::PacketBuffer;
use crate::registry::{CommandSink, StreamingRegistry};
use crate::session::{SessionContext, SessionDelegate, SessionHandle};

/// Outcome of one [`StreamingServer::publish`](super::StreamingServer::publish) call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Connections the samples were queued for
    pub connections: usize,
    /// Packets queued across all connections
    pub packets: usize,
    /// Packets smaller than requested because of pool fragmentation
    pub degraded_packets: usize,
    /// Samples a connection could not take (pool saturated or closed)
    pub dropped_samples: usize,
}

/// One accepted connection
pub struct ServerConnection {
    id: u64,
    peer_addr: SocketAddr,
    session: SessionHandle,
    registry: StreamingRegistry,
    pool: PacketMemoryPool,
    client_type: Mutex<Option<ClientType>>,
}

impl ServerConnection {
    pub(super) fn new(id: u64, peer_addr: SocketAddr, session: SessionHandle, pool_capacity: usize) -> Self {
        let sink: Arc<dyn CommandSink> = Arc::new(session.clone());
        Self {
            id,
            peer_addr,
            registry: StreamingRegistry::with_sink(id, sink),
            session,
            pool: PacketMemoryPool::new(pool_capacity),
            client_type: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Signals published to this peer
    pub fn registry(&self) -> &StreamingRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &PacketMemoryPool {
        &self.pool
    }

    pub fn client_type(&self) -> Option<ClientType> {
        *self.client_type.lock()
    }

    /// Snapshot for inspection
    pub fn context(&self) -> SessionContext {
        let mut context = SessionContext::new(self.id, self.peer_addr);
        context.client_type = self.client_type();
        context.stats = self.session.lock().stats().clone();
        context
    }

    /// Queue `data` (whole samples of `stride` bytes) as packets for
    /// `numeric_id`, splitting wherever the pool grants less than asked.
    pub(super) fn send_samples(
        &self,
        numeric_id: u64,
        data: &[u8],
        stride: usize,
        timestamp: Instant,
        report: &mut PublishReport,
    ) {
        let mut offset = 0;
        while offset < data.len() {
            let remaining = (data.len() - offset) / stride;
            let Allocation {
                mut region,
                granted_samples,
                status,
            } = match self.pool.allocate(remaining, stride) {
                Ok(allocation) => allocation,
                Err(e) => {
                    tracing::warn!(
                        session_id = self.id,
                        dropped = remaining,
                        error = %e,
                        "Dropping samples"
                    );
                    report.dropped_samples += remaining;
                    return;
                }
            };

            if status == AllocationStatus::Reduced {
                report.degraded_packets += 1;
            }
            let len = granted_samples * stride;
            region.fill(&data[offset..offset + len]);

            let packet = PacketBuffer::pooled(PACKET_TYPE_DATA, numeric_id, region);
            if let Err(e) = self.session.send_packet(packet, Some(timestamp)) {
                tracing::warn!(session_id = self.id, error = %e, "Failed to queue packet");
                report.dropped_samples += remaining;
                return;
            }
            report.packets += 1;
            offset += len;
        }
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("client_type", &self.client_type())
            .finish()
    }
}

/// Routes one connection's messages into the server
pub(super) struct ConnectionDelegate {
    pub shared: Arc<ServerShared>,
    pub connection: Arc<ServerConnection>,
}

impl ConnectionDelegate {
    fn handle_init(&self, client_type: ClientType) {
        let connection = &self.connection;
        if connection.client_type().is_some() {
            tracing::warn!(session_id = connection.id, "Repeated init request ignored");
            return;
        }

        if let Err(reason) = self.shared.admission.admit(connection.id, client_type) {
            self.reject(reason);
            return;
        }
        *connection.client_type.lock() = Some(client_type);

        // Holding the signal list keeps add_signal from slipping between
        // the announcements and the connection becoming visible.
        let signals = self.shared.signals.lock();
        for signal in signals.iter() {
            if let Err(e) = connection.registry.register_signal(signal.as_ref()) {
                tracing::warn!(session_id = connection.id, error = %e, "Failed to announce signal");
            }
        }
        self.shared
            .connections
            .lock()
            .insert(connection.id, Arc::clone(connection));
        drop(signals);

        if let Err(e) = connection.session.send(Message::ProtocolInitDone) {
            tracing::warn!(session_id = connection.id, error = %e, "Failed to complete handshake");
            return;
        }
        tracing::info!(
            session_id = connection.id,
            peer = %connection.peer_addr,
            client_type = ?client_type,
            "Client admitted"
        );
    }

    fn reject(&self, reason: RejectReason) {
        let connection = &self.connection;
        let message = match reason {
            RejectReason::ConnectionLimit => "connection limit reached".to_string(),
            RejectReason::ControlRejected => "control connection already active".to_string(),
        };
        tracing::warn!(
            session_id = connection.id,
            peer = %connection.peer_addr,
            reason = %message,
            "Client rejected"
        );
        self.shared.stats.lock().rejected_connections += 1;

        if let Err(e) = connection
            .session
            .send(Message::ConnectionRejected { reason, message })
        {
            tracing::warn!(session_id = connection.id, error = %e, "Failed to send rejection");
        }
        connection.session.close_when_flushed("connection rejected");
    }
}

impl SessionDelegate for ConnectionDelegate {
    fn on_message(&self, session: &SessionHandle, message: Message) {
        if let Message::ProtocolInitRequest { client_type } = message {
            self.handle_init(client_type);
            return;
        }
        if self.connection.client_type().is_none() {
            tracing::warn!(
                session_id = session.id(),
                payload = message.payload_type().name(),
                "Message before handshake ignored"
            );
            return;
        }

        let registry = &self.connection.registry;
        let result = match message {
            Message::Subscribe { numeric_id, .. } => registry.handle_peer_subscribe(numeric_id).map(drop),
            Message::Unsubscribe { numeric_id, .. } => {
                registry.handle_peer_unsubscribe(numeric_id).map(drop)
            }
            other => {
                tracing::debug!(
                    session_id = session.id(),
                    payload = other.payload_type().name(),
                    "Ignoring message"
                );
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(session_id = session.id(), error = %e, "Failed to handle command");
        }
    }

    fn on_closed(&self, session: &SessionHandle, reason: &str) {
        let id = session.id();
        let was_admitted = self.shared.connections.lock().remove(&id).is_some();
        if was_admitted {
            self.shared.admission.release(id);
        }
        let mut stats = self.shared.stats.lock();
        stats.active_connections = stats.active_connections.saturating_sub(1);
        drop(stats);
        tracing::info!(session_id = id, reason = %reason, "Connection closed");
    }
}
