//! Streaming client
//!
//! Binds one session and one registry to a server connection, keeps the
//! registry alive across reconnects, and reports protocol events through a
//! [`StreamingHandler`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::config::ClientConfig;
use crate::error::{Error, Result};
use crate::mirror::StreamingSource;
use crate::protocol::message::Message;
use crate::protocol::packet::PacketBuffer;
use crate::registry::StreamingRegistry;
use crate::session::{SessionDelegate, SessionHandle};
use crate::signal::MirroredSignal;

/// Connection status reported while the client recovers from a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionStatus {
    /// First handshake completed
    Connected,
    /// Connection lost; attempting to reconnect
    Reconnecting,
    /// Reconnected and resynchronized
    Restored,
    /// Gave up reconnecting
    Unrecoverable,
}

/// Protocol events of a streaming client.
///
/// All callbacks run on the connection's task.
pub trait StreamingHandler: Send + Sync {
    /// The server announced a signal
    fn on_signal_available(&self, _signal_id: &str, _serialized: &str) {}

    /// The server withdrew a signal
    fn on_signal_unavailable(&self, _signal_id: &str) {}

    /// A packet arrived that no mirrored signal claimed
    fn on_packet(&self, _signal_id: &str, _packet: PacketBuffer) {}

    /// The server acknowledged a subscribe (`true`) or unsubscribe
    fn on_subscription_ack(&self, _signal_id: &str, _subscribed: bool) {}

    /// Connection status changed
    fn on_reconnection_status_changed(&self, _status: ReconnectionStatus) {}
}

/// Handler that ignores every event
#[derive(Debug, Default)]
pub struct NoopHandler;

impl StreamingHandler for NoopHandler {}

/// Client side of one streaming connection
pub struct StreamingClient {
    pub(super) config: ClientConfig,
    connection_id: String,
    pub(super) registry: StreamingRegistry,
    handler: Arc<dyn StreamingHandler>,
    pub(super) session: Mutex<Option<SessionHandle>>,
    status: Mutex<Option<ReconnectionStatus>>,
    pub(super) init_waiter: Mutex<Option<oneshot::Sender<Result<()>>>>,
    pub(super) closing: AtomicBool,
    pub(super) next_session_id: AtomicU64,
}

impl StreamingClient {
    pub(super) fn new(config: ClientConfig, handler: Arc<dyn StreamingHandler>) -> Self {
        Self {
            connection_id: config.connection_id(),
            config,
            registry: StreamingRegistry::new(0),
            handler,
            session: Mutex::new(None),
            status: Mutex::new(None),
            init_waiter: Mutex::new(None),
            closing: AtomicBool::new(false),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscription ledger of this connection
    pub fn registry(&self) -> &StreamingRegistry {
        &self.registry
    }

    /// Last reported status, `None` before the first handshake
    pub fn status(&self) -> Option<ReconnectionStatus> {
        *self.status.lock()
    }

    /// Whether a live session is attached
    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map_or(false, |session| !session.is_closed())
    }

    /// Track a mirrored signal on this connection
    pub fn add_signal(&self, signal: &Arc<dyn MirroredSignal>) -> Result<()> {
        self.registry.add_signal(signal)
    }

    /// Stop tracking a mirrored signal
    pub fn remove_signal(&self, remote_id: &str) -> Result<()> {
        self.registry.remove_signal(remote_id)
    }

    /// Close the connection without reconnecting
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.lock().as_ref() {
            session.close("client closed");
        }
    }

    pub(super) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(super) fn set_status(&self, status: ReconnectionStatus) {
        {
            let mut current = self.status.lock();
            if *current == Some(status) {
                return;
            }
            *current = Some(status);
        }
        tracing::info!(connection = %self.connection_id, status = ?status, "Connection status changed");
        self.handler.on_reconnection_status_changed(status);
    }

    fn finish_init(&self, result: Result<()>) {
        if let Some(waiter) = self.init_waiter.lock().take() {
            let _ = waiter.send(result);
        }
    }

    fn on_init_done(&self) {
        if !self.registry.is_reconnecting() {
            self.set_status(ReconnectionStatus::Connected);
            self.finish_init(Ok(()));
            return;
        }

        match self.registry.complete_reconnection() {
            Ok(diff) => {
                for signal_id in &diff.unavailable {
                    self.handler.on_signal_unavailable(signal_id);
                }
                for available in &diff.available {
                    self.handler
                        .on_signal_available(&available.key, &available.serialized);
                }
                self.set_status(ReconnectionStatus::Restored);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to complete reconnection"),
        }
        self.finish_init(Ok(()));
    }

    fn dispatch(&self, session: &SessionHandle, message: Message) -> Result<()> {
        match message {
            Message::SignalAvailable {
                numeric_id,
                signal_id,
                serialized,
            } => {
                let reconnecting = self.registry.is_reconnecting();
                self.registry
                    .mark_available(&signal_id, numeric_id, serialized.clone())?;
                if !reconnecting {
                    self.handler.on_signal_available(&signal_id, &serialized);
                }
            }
            Message::SignalUnavailable { signal_id, .. } => {
                self.registry.mark_unavailable(&signal_id)?;
                self.handler.on_signal_unavailable(&signal_id);
            }
            Message::SubscribeAck { numeric_id } => {
                let signal_id = self.registry.handle_ack(numeric_id, true)?;
                self.handler.on_subscription_ack(&signal_id, true);
            }
            Message::UnsubscribeAck { numeric_id } => {
                let signal_id = self.registry.handle_ack(numeric_id, false)?;
                self.handler.on_subscription_ack(&signal_id, false);
            }
            Message::Packet(packet) => {
                if let Some(packet) = self.registry.route_packet(packet) {
                    match self.registry.available_key(packet.signal_id()) {
                        Some(signal_id) => self.handler.on_packet(&signal_id, packet),
                        None => tracing::trace!(
                            numeric_id = packet.signal_id(),
                            "Dropping packet for unknown signal"
                        ),
                    }
                }
            }
            Message::ProtocolInitDone => self.on_init_done(),
            Message::ConnectionRejected { reason, message } => {
                tracing::warn!(
                    connection = %self.connection_id,
                    reason = ?reason,
                    message = %message,
                    "Connection rejected"
                );
                // A rejected client must not retry
                self.closing.store(true, Ordering::SeqCst);
                session.close(format!("rejected: {}", message));
                self.finish_init(Err(Error::ConnectionRejected(message)));
            }
            Message::Subscribe { numeric_id, .. } => {
                self.registry.handle_peer_subscribe(numeric_id)?;
            }
            Message::Unsubscribe { numeric_id, .. } => {
                self.registry.handle_peer_unsubscribe(numeric_id)?;
            }
            Message::Config(packet) => {
                tracing::debug!(
                    request_id = packet.header.request_id,
                    len = packet.payload.len(),
                    "Ignoring configuration packet"
                );
            }
            Message::ProtocolInitRequest { .. } => {
                tracing::warn!("Unexpected init request from server");
            }
        }
        Ok(())
    }
}

impl SessionDelegate for StreamingClient {
    fn on_message(&self, session: &SessionHandle, message: Message) {
        let name = message.payload_type().name();
        if let Err(e) = self.dispatch(session, message) {
            tracing::warn!(
                session_id = session.id(),
                payload = name,
                error = %e,
                "Failed to handle message"
            );
        }
    }

    fn on_closed(&self, session: &SessionHandle, reason: &str) {
        tracing::info!(session_id = session.id(), reason = %reason, "Streaming connection closed");
        self.finish_init(Err(Error::ConnectionClosed(reason.to_string())));
    }
}

impl StreamingSource for StreamingClient {
    fn connection_id(&self) -> String {
        self.connection_id.clone()
    }

    fn subscribe(&self, remote_id: &str, domain_id: Option<&str>) -> Result<()> {
        self.registry.subscribe(remote_id, domain_id)
    }

    fn unsubscribe(&self, remote_id: &str, domain_id: Option<&str>) -> Result<()> {
        self.registry.unsubscribe(remote_id, domain_id)
    }
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("connection_id", &self.connection_id)
            .field("status", &self.status())
            .field("registry", &self.registry)
            .finish()
    }
}
