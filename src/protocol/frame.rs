//! Transport frame header
//!
//! Every message on the wire is wrapped in a fixed 5-byte header:
//!
//! ```text
//! +--------------+---------------------------+----------------------+
//! | payload type | payload length (u32 LE)   | payload[length]      |
//! |   1 byte     |   4 bytes                 |                      |
//! +--------------+---------------------------+----------------------+
//! ```
//!
//! The header is read with one fixed-length read before anything is known
//! about the payload, and the length is checked against the protocol
//! ceiling before any buffer is reserved for the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::error::ProtocolError;

/// Type tag of a transport frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    StreamingPacket,
    SignalAvailable,
    SignalUnavailable,
    ProtocolInitRequest,
    ProtocolInitDone,
    Subscribe,
    Unsubscribe,
    ConfigurationPacket,
    SubscribeAck,
    UnsubscribeAck,
    ConnectionRejected,
}

impl PayloadType {
    /// Wire code of this payload type
    pub fn code(self) -> u8 {
        match self {
            PayloadType::StreamingPacket => PAYLOAD_STREAMING_PACKET,
            PayloadType::SignalAvailable => PAYLOAD_SIGNAL_AVAILABLE,
            PayloadType::SignalUnavailable => PAYLOAD_SIGNAL_UNAVAILABLE,
            PayloadType::ProtocolInitRequest => PAYLOAD_PROTOCOL_INIT_REQUEST,
            PayloadType::ProtocolInitDone => PAYLOAD_PROTOCOL_INIT_DONE,
            PayloadType::Subscribe => PAYLOAD_SUBSCRIBE,
            PayloadType::Unsubscribe => PAYLOAD_UNSUBSCRIBE,
            PayloadType::ConfigurationPacket => PAYLOAD_CONFIGURATION_PACKET,
            PayloadType::SubscribeAck => PAYLOAD_SUBSCRIBE_ACK,
            PayloadType::UnsubscribeAck => PAYLOAD_UNSUBSCRIBE_ACK,
            PayloadType::ConnectionRejected => PAYLOAD_CONNECTION_REJECTED,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            PAYLOAD_STREAMING_PACKET => PayloadType::StreamingPacket,
            PAYLOAD_SIGNAL_AVAILABLE => PayloadType::SignalAvailable,
            PAYLOAD_SIGNAL_UNAVAILABLE => PayloadType::SignalUnavailable,
            PAYLOAD_PROTOCOL_INIT_REQUEST => PayloadType::ProtocolInitRequest,
            PAYLOAD_PROTOCOL_INIT_DONE => PayloadType::ProtocolInitDone,
            PAYLOAD_SUBSCRIBE => PayloadType::Subscribe,
            PAYLOAD_UNSUBSCRIBE => PayloadType::Unsubscribe,
            PAYLOAD_CONFIGURATION_PACKET => PayloadType::ConfigurationPacket,
            PAYLOAD_SUBSCRIBE_ACK => PayloadType::SubscribeAck,
            PAYLOAD_UNSUBSCRIBE_ACK => PayloadType::UnsubscribeAck,
            PAYLOAD_CONNECTION_REJECTED => PayloadType::ConnectionRejected,
            _ => return None,
        })
    }

    /// Short name used in logs and error messages
    pub fn name(self) -> &'static str {
        match self {
            PayloadType::StreamingPacket => "streaming packet",
            PayloadType::SignalAvailable => "signal available",
            PayloadType::SignalUnavailable => "signal unavailable",
            PayloadType::ProtocolInitRequest => "protocol init request",
            PayloadType::ProtocolInitDone => "protocol init done",
            PayloadType::Subscribe => "subscribe",
            PayloadType::Unsubscribe => "unsubscribe",
            PayloadType::ConfigurationPacket => "configuration packet",
            PayloadType::SubscribeAck => "subscribe ack",
            PayloadType::UnsubscribeAck => "unsubscribe ack",
            PayloadType::ConnectionRejected => "connection rejected",
        }
    }
}

/// Decoded transport header.
///
/// The type is kept as the raw code so an unknown type can still be
/// skipped by its declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub payload_type: u8,
    pub payload_length: u32,
}

impl TransportHeader {
    pub fn new(payload_type: PayloadType, payload_length: u32) -> Self {
        Self {
            payload_type: payload_type.code(),
            payload_length,
        }
    }

    /// Typed payload kind
    pub fn kind(&self) -> Result<PayloadType, ProtocolError> {
        PayloadType::from_code(self.payload_type)
            .ok_or(ProtocolError::UnknownPayloadType(self.payload_type))
    }

    /// Encode into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.payload_type);
        buf.put_u32_le(self.payload_length);
    }

    /// Decode from the first [`TRANSPORT_HEADER_SIZE`] bytes of `buf`.
    ///
    /// Returns `None` if fewer bytes are available. No validation is done
    /// here; see [`TransportHeader::validate`].
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < TRANSPORT_HEADER_SIZE {
            return None;
        }
        let payload_type = buf.get_u8();
        let payload_length = buf.get_u32_le();
        Some(Self {
            payload_type,
            payload_length,
        })
    }

    /// Check the declared length against `max_payload`
    pub fn validate(&self, max_payload: u32) -> Result<(), ProtocolError> {
        if self.payload_length > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                len: self.payload_length,
                max: max_payload,
            });
        }
        Ok(())
    }
}

/// Build a complete frame (header + payload) as one contiguous buffer
pub fn encode_frame(payload_type: PayloadType, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let len = payload_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(TRANSPORT_HEADER_SIZE + payload.len());
    TransportHeader::new(payload_type, len).encode(&mut buf);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Build only the header for a payload that is written separately
pub fn encode_header(payload_type: PayloadType, len: usize) -> Result<Bytes, ProtocolError> {
    let len = payload_len(len)?;
    let mut buf = BytesMut::with_capacity(TRANSPORT_HEADER_SIZE);
    TransportHeader::new(payload_type, len).encode(&mut buf);
    Ok(buf.freeze())
}

fn payload_len(len: usize) -> Result<u32, ProtocolError> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_PAYLOAD_SIZE => Ok(len),
        _ => Err(ProtocolError::PayloadTooLarge {
            len: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_PAYLOAD_SIZE,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        TransportHeader::new(PayloadType::Subscribe, 0x0102_0304).encode(&mut buf);

        assert_eq!(&buf[..], &[PAYLOAD_SUBSCRIBE, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_header_decode_needs_full_header() {
        assert!(TransportHeader::decode(&[0x01, 0x00, 0x00]).is_none());

        let header = TransportHeader::decode(&[0x09, 8, 0, 0, 0]).unwrap();
        assert_eq!(header.kind(), Ok(PayloadType::SubscribeAck));
        assert_eq!(header.payload_length, 8);
    }

    #[test]
    fn test_header_boundary_lengths() {
        let zero = TransportHeader::new(PayloadType::ProtocolInitDone, 0);
        assert!(zero.validate(MAX_PAYLOAD_SIZE).is_ok());

        let max = TransportHeader::new(PayloadType::StreamingPacket, MAX_PAYLOAD_SIZE);
        let mut buf = BytesMut::new();
        max.encode(&mut buf);
        let decoded = TransportHeader::decode(&buf).unwrap();
        assert_eq!(decoded, max);
        assert!(decoded.validate(MAX_PAYLOAD_SIZE).is_ok());

        let over = TransportHeader::new(PayloadType::StreamingPacket, MAX_PAYLOAD_SIZE + 1);
        assert_eq!(
            over.validate(MAX_PAYLOAD_SIZE),
            Err(ProtocolError::PayloadTooLarge {
                len: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE
            })
        );
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let header = TransportHeader::decode(&[0x7e, 3, 0, 0, 0]).unwrap();
        assert_eq!(header.kind(), Err(ProtocolError::UnknownPayloadType(0x7e)));
        assert_eq!(header.payload_type, 0x7e);
    }

    #[test]
    fn test_payload_type_codes_round_trip() {
        for code in 0u8..=0x0F {
            if let Some(kind) = PayloadType::from_code(code) {
                assert_eq!(kind.code(), code);
            }
        }
        assert!(PayloadType::from_code(0x00).is_none());
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(PayloadType::SubscribeAck, &7u64.to_le_bytes()).unwrap();
        assert_eq!(frame.len(), TRANSPORT_HEADER_SIZE + 8);
        assert_eq!(frame[0], PAYLOAD_SUBSCRIBE_ACK);
        assert_eq!(&frame[1..5], &8u32.to_le_bytes());
    }
}
