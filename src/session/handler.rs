//! Sans-IO session handler
//!
//! Owns the framing state of one connection. The host feeds received bytes
//! in with [`SessionHandler::feed`] and pulls outgoing writes with
//! [`SessionHandler::next_write`]; nothing in here touches a socket.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use super::config::SessionConfig;
use super::state::{ReadTask, SessionPhase};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::TRANSPORT_HEADER_SIZE;
use crate::protocol::frame::{encode_header, PayloadType, TransportHeader};
use crate::protocol::message::Message;
use crate::protocol::packet::{PacketBuffer, PacketPayload};
use crate::stats::SessionStats;

/// One queued write: framing bytes plus an optional packet payload.
///
/// A pooled payload stays loaned until the task is dropped, so the host
/// drops the task once the bytes are on the wire.
#[derive(Debug)]
pub struct WriteTask {
    head: Bytes,
    body: Option<PacketPayload>,
    deadline: Option<Instant>,
}

impl WriteTask {
    fn frame(head: Bytes) -> Self {
        Self {
            head,
            body: None,
            deadline: None,
        }
    }

    /// Framing bytes (transport header, and packet header for packets)
    pub fn head(&self) -> &Bytes {
        &self.head
    }

    /// Payload bytes, if any
    pub fn body(&self) -> Option<Bytes> {
        self.body.as_ref().map(PacketPayload::to_bytes)
    }

    pub fn len(&self) -> usize {
        self.head.len() + self.body.as_ref().map_or(0, PacketPayload::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything in one buffer
    pub fn to_bytes(&self) -> Bytes {
        match self.body() {
            None => self.head.clone(),
            Some(body) => {
                let mut buf = BytesMut::with_capacity(self.len());
                buf.extend_from_slice(&self.head);
                buf.extend_from_slice(&body);
                buf.freeze()
            }
        }
    }
}

/// Framing state machine for one connection
#[derive(Debug)]
pub struct SessionHandler {
    id: u64,
    config: SessionConfig,
    task: ReadTask,
    read_buf: BytesMut,
    write_queue: VecDeque<WriteTask>,
    /// Earliest deadline of the batch pending since the queue was last empty
    batch_deadline: Option<Instant>,
    close_reason: Option<String>,
    /// Close requested once the queue drains
    closing: Option<String>,
    stats: SessionStats,
}

impl SessionHandler {
    pub fn new(id: u64, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            task: ReadTask::Header,
            read_buf: BytesMut::with_capacity(TRANSPORT_HEADER_SIZE),
            write_queue: VecDeque::new(),
            batch_deadline: None,
            close_reason: None,
            closing: None,
            stats: SessionStats::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.task.phase()
    }

    pub fn is_closed(&self) -> bool {
        self.task == ReadTask::Stop
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Feed received bytes; decoded messages are appended to `out`.
    ///
    /// Messages decoded before a fatal error stay in `out`. A fatal error
    /// closes the session.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<Message>) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        self.stats.bytes_received += data.len() as u64;
        self.read_buf.extend_from_slice(data);

        loop {
            match self.run_task(out) {
                Ok(Some(next)) => self.task = next,
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::error!(session_id = self.id, error = %e, "Fatal framing error");
                    self.close(e.to_string());
                    return Err(e);
                }
            }
        }
    }

    /// Run the current read task. `Ok(None)` means more bytes are needed.
    fn run_task(&mut self, out: &mut Vec<Message>) -> Result<Option<ReadTask>> {
        match self.task {
            ReadTask::Header => {
                let header = match TransportHeader::decode(&self.read_buf) {
                    Some(header) => header,
                    None => return Ok(None),
                };
                let _ = self.read_buf.split_to(TRANSPORT_HEADER_SIZE);
                Ok(Some(self.task_for_header(header)))
            }
            ReadTask::Payload { kind, len } => {
                if self.read_buf.len() < len {
                    self.read_buf.reserve(len - self.read_buf.len());
                    return Ok(None);
                }
                let payload = self.read_buf.split_to(len).freeze();
                self.handle_payload(kind, payload, out)?;
                Ok(Some(ReadTask::Header))
            }
            ReadTask::Discard { remaining } => {
                let n = remaining.min(self.read_buf.len());
                let _ = self.read_buf.split_to(n);
                self.stats.discarded_bytes += n as u64;
                if n < remaining {
                    self.task = ReadTask::Discard {
                        remaining: remaining - n,
                    };
                    return Ok(None);
                }
                Ok(Some(ReadTask::Header))
            }
            ReadTask::Stop => Ok(None),
        }
    }

    /// Choose the payload task for a freshly read header
    fn task_for_header(&mut self, header: TransportHeader) -> ReadTask {
        let len = header.payload_length as usize;

        if let Err(e) = header.validate(self.config.max_payload_size) {
            tracing::warn!(
                session_id = self.id,
                payload_type = header.payload_type,
                error = %e,
                "Discarding oversized payload"
            );
            self.stats.discarded_payloads += 1;
            return ReadTask::Discard { remaining: len };
        }

        match header.kind() {
            Ok(kind) => ReadTask::Payload { kind, len },
            Err(e) => {
                tracing::warn!(
                    session_id = self.id,
                    len = len,
                    error = %e,
                    "Discarding payload of unknown type"
                );
                self.stats.discarded_payloads += 1;
                ReadTask::Discard { remaining: len }
            }
        }
    }

    fn handle_payload(
        &mut self,
        kind: PayloadType,
        payload: Bytes,
        out: &mut Vec<Message>,
    ) -> Result<()> {
        match Message::decode(kind, payload) {
            Ok(message) => {
                self.stats.frames_received += 1;
                if kind == PayloadType::StreamingPacket {
                    self.stats.packets_received += 1;
                }
                out.push(message);
                Ok(())
            }
            Err(e @ ProtocolError::HeaderSizeMismatch { .. }) => Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    session_id = self.id,
                    payload = kind.name(),
                    error = %e,
                    "Discarding malformed payload"
                );
                self.stats.discarded_payloads += 1;
                Ok(())
            }
        }
    }

    /// Queue a message for writing
    pub fn send(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Packet(packet) => self.send_packet(packet, None),
            message => {
                if self.is_closed() || self.closing.is_some() {
                    return Err(self.closed_error());
                }
                let frame = message.encode()?;
                tracing::trace!(
                    session_id = self.id,
                    payload = message.payload_type().name(),
                    len = frame.len(),
                    "Queued frame"
                );
                self.enqueue(WriteTask::frame(frame));
                Ok(())
            }
        }
    }

    /// Queue a streaming packet.
    ///
    /// When a send latency is configured, `timestamp` (the packet's
    /// creation time) plus that latency becomes the packet's deadline.
    pub fn send_packet(&mut self, packet: PacketBuffer, timestamp: Option<Instant>) -> Result<()> {
        if self.is_closed() || self.closing.is_some() {
            return Err(self.closed_error());
        }

        let packet_header = packet.encode_header();
        let frame_header = encode_header(PayloadType::StreamingPacket, packet.encoded_len())?;
        let mut head = BytesMut::with_capacity(frame_header.len() + packet_header.len());
        head.extend_from_slice(&frame_header);
        head.extend_from_slice(&packet_header);

        let deadline = match (timestamp, self.config.max_send_latency) {
            (Some(ts), Some(latency)) => Some(ts + latency),
            _ => None,
        };

        self.stats.packets_sent += 1;
        self.enqueue(WriteTask {
            head: head.freeze(),
            body: packet.payload,
            deadline,
        });
        Ok(())
    }

    fn enqueue(&mut self, task: WriteTask) {
        if let Some(deadline) = task.deadline {
            self.batch_deadline = Some(match self.batch_deadline {
                Some(current) => current.min(deadline),
                None => deadline,
            });
        }
        self.stats.frames_sent += 1;
        self.write_queue.push_back(task);
    }

    /// Take the next write, in enqueue order.
    ///
    /// The batch deadline stays armed until [`write_completed`](Self::write_completed)
    /// reports the last write of the batch on the wire.
    pub fn next_write(&mut self) -> Option<WriteTask> {
        let task = self.write_queue.pop_front()?;
        self.stats.bytes_sent += task.len() as u64;
        Some(task)
    }

    /// A write taken with `next_write` finished
    pub fn write_completed(&mut self) {
        if self.write_queue.is_empty() {
            self.batch_deadline = None;
        }
    }

    /// Number of writes waiting
    pub fn pending_writes(&self) -> usize {
        self.write_queue.len()
    }

    /// Deadline of the pending batch
    pub fn batch_deadline(&self) -> Option<Instant> {
        self.batch_deadline
    }

    /// Close the session if the pending batch missed its deadline.
    ///
    /// The whole batch is dropped; nothing is reordered.
    pub fn check_deadline(&mut self, now: Instant) -> Result<()> {
        match self.batch_deadline {
            Some(deadline) if now >= deadline => {
                let dropped = self.write_queue.len();
                let reason = format!(
                    "send deadline exceeded by {:?} with {} writes pending",
                    now - deadline,
                    dropped
                );
                tracing::warn!(session_id = self.id, dropped = dropped, "{}", reason);
                self.stats.expired_batches += 1;
                self.close(reason.clone());
                Err(Error::ConnectionClosed(reason))
            }
            _ => Ok(()),
        }
    }

    /// Stop accepting writes and close once the queued ones are flushed
    pub fn close_when_flushed(&mut self, reason: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        if self.write_queue.is_empty() {
            self.close(reason);
        } else {
            self.closing = Some(reason.into());
        }
    }

    /// Complete a pending [`close_when_flushed`](Self::close_when_flushed).
    /// Returns true if the session is closed.
    pub(crate) fn finish_if_flushed(&mut self) -> bool {
        if self.write_queue.is_empty() {
            if let Some(reason) = self.closing.take() {
                self.close(reason);
            }
        }
        self.is_closed()
    }

    /// Close the session, cancelling all pending writes
    pub fn close(&mut self, reason: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let reason = reason.into();
        tracing::debug!(session_id = self.id, reason = %reason, "Session closed");
        self.task = ReadTask::Stop;
        self.write_queue.clear();
        self.batch_deadline = None;
        self.read_buf.clear();
        self.closing = None;
        self.close_reason = Some(reason);
    }

    fn closed_error(&self) -> Error {
        Error::ConnectionClosed(
            self.close_reason
                .clone()
                .or_else(|| self.closing.clone())
                .unwrap_or_else(|| "session closed".into()),
        )
    }
}
