//! Thread-safe handle to a session
//!
//! Application threads enqueue writes through the handle; the connection's
//! driver task is woken to flush them. Enqueueing never blocks on I/O.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;

use super::config::SessionConfig;
use super::handler::{SessionHandler, WriteTask};
use crate::error::Result;
use crate::protocol::message::Message;
use crate::protocol::packet::PacketBuffer;

/// Cloneable handle shared between the driver and application code
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    handler: Arc<Mutex<SessionHandler>>,
    wake: Arc<Notify>,
}

impl SessionHandle {
    pub fn new(id: u64, config: SessionConfig) -> Self {
        Self {
            id,
            handler: Arc::new(Mutex::new(SessionHandler::new(id, config))),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lock the underlying handler
    pub fn lock(&self) -> MutexGuard<'_, SessionHandler> {
        self.handler.lock()
    }

    /// Queue a message and wake the writer
    pub fn send(&self, message: Message) -> Result<()> {
        self.handler.lock().send(message)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Queue a streaming packet and wake the writer
    pub fn send_packet(&self, packet: PacketBuffer, timestamp: Option<Instant>) -> Result<()> {
        self.handler.lock().send_packet(packet, timestamp)?;
        self.wake.notify_one();
        Ok(())
    }

    pub(crate) fn next_write(&self) -> Option<WriteTask> {
        self.handler.lock().next_write()
    }

    pub(crate) fn write_completed(&self) {
        self.handler.lock().write_completed();
    }

    /// Stop accepting writes and close once the queue is flushed
    pub fn close_when_flushed(&self, reason: impl Into<String>) {
        self.handler.lock().close_when_flushed(reason);
        self.wake.notify_one();
    }

    /// Close the session and wake the driver so it can exit
    pub fn close(&self, reason: impl Into<String>) {
        self.handler.lock().close(reason);
        self.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.handler.lock().is_closed()
    }

    pub(crate) async fn wait_for_writes(&self) {
        self.wake.notified().await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
