//! Typed frame payloads
//!
//! | type                  | body                                                     |
//! |-----------------------|----------------------------------------------------------|
//! | SIGNAL_AVAILABLE      | id:u64, len:u16, string id[len], serialized[remaining]   |
//! | SIGNAL_UNAVAILABLE    | id:u64, string id[remaining]                             |
//! | SUBSCRIBE/UNSUBSCRIBE | id:u64, string id[remaining]                             |
//! | *_ACK                 | id:u64                                                   |
//! | PROTOCOL_INIT_REQUEST | client type:u8                                           |
//! | PROTOCOL_INIT_DONE    | (empty)                                                  |
//! | CONNECTION_REJECTED   | reason:u8, message[remaining]                            |
//! | STREAMING_PACKET      | GenericPacketHeader + payload                            |
//! | CONFIGURATION_PACKET  | ConfigPacketHeader + payload                             |
//!
//! A trailing string consumes the remaining frame bytes. Where two strings
//! follow each other the first one carries an explicit u16 length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use super::frame::{encode_frame, PayloadType};
use super::packet::{ConfigPacket, PacketBuffer};
use crate::error::ProtocolError;

/// Kind of client asking to be admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    /// May change device state; coexists with other control clients
    Control,
    /// Sole controller; excludes every other control client
    ExclusiveControl,
    /// Read-only observer
    ViewOnly,
}

impl ClientType {
    pub fn code(self) -> u8 {
        match self {
            ClientType::Control => 0,
            ClientType::ExclusiveControl => 1,
            ClientType::ViewOnly => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(ClientType::Control),
            1 => Ok(ClientType::ExclusiveControl),
            2 => Ok(ClientType::ViewOnly),
            value => Err(ProtocolError::InvalidValue {
                field: "client type",
                value,
            }),
        }
    }
}

/// Why the server refused a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Server connection limit reached
    ConnectionLimit,
    /// Control admission conflicts with an existing exclusive client
    ControlRejected,
}

impl RejectReason {
    pub fn code(self) -> u8 {
        match self {
            RejectReason::ConnectionLimit => 1,
            RejectReason::ControlRejected => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            1 => Ok(RejectReason::ConnectionLimit),
            2 => Ok(RejectReason::ControlRejected),
            value => Err(ProtocolError::InvalidValue {
                field: "reject reason",
                value,
            }),
        }
    }
}

/// A decoded frame payload
#[derive(Debug)]
pub enum Message {
    SignalAvailable {
        numeric_id: u64,
        signal_id: String,
        serialized: String,
    },
    SignalUnavailable {
        numeric_id: u64,
        signal_id: String,
    },
    Subscribe {
        numeric_id: u64,
        signal_id: String,
    },
    Unsubscribe {
        numeric_id: u64,
        signal_id: String,
    },
    SubscribeAck {
        numeric_id: u64,
    },
    UnsubscribeAck {
        numeric_id: u64,
    },
    ProtocolInitRequest {
        client_type: ClientType,
    },
    ProtocolInitDone,
    ConnectionRejected {
        reason: RejectReason,
        message: String,
    },
    Packet(PacketBuffer),
    Config(ConfigPacket),
}

impl Message {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Message::SignalAvailable { .. } => PayloadType::SignalAvailable,
            Message::SignalUnavailable { .. } => PayloadType::SignalUnavailable,
            Message::Subscribe { .. } => PayloadType::Subscribe,
            Message::Unsubscribe { .. } => PayloadType::Unsubscribe,
            Message::SubscribeAck { .. } => PayloadType::SubscribeAck,
            Message::UnsubscribeAck { .. } => PayloadType::UnsubscribeAck,
            Message::ProtocolInitRequest { .. } => PayloadType::ProtocolInitRequest,
            Message::ProtocolInitDone => PayloadType::ProtocolInitDone,
            Message::ConnectionRejected { .. } => PayloadType::ConnectionRejected,
            Message::Packet(_) => PayloadType::StreamingPacket,
            Message::Config(_) => PayloadType::ConfigurationPacket,
        }
    }

    /// Encode the payload body (without transport header)
    pub fn encode_payload(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        match self {
            Message::SignalAvailable {
                numeric_id,
                signal_id,
                serialized,
            } => {
                let id_len = u16::try_from(signal_id.len()).map_err(|_| {
                    ProtocolError::PayloadTooLarge {
                        len: signal_id.len() as u32,
                        max: u16::MAX as u32,
                    }
                })?;
                buf.reserve(NUMERIC_ID_SIZE + STRING_LEN_PREFIX_SIZE + signal_id.len() + serialized.len());
                buf.put_u64_le(*numeric_id);
                buf.put_u16_le(id_len);
                buf.put_slice(signal_id.as_bytes());
                buf.put_slice(serialized.as_bytes());
            }
            Message::SignalUnavailable {
                numeric_id,
                signal_id,
            }
            | Message::Subscribe {
                numeric_id,
                signal_id,
            }
            | Message::Unsubscribe {
                numeric_id,
                signal_id,
            } => {
                buf.reserve(NUMERIC_ID_SIZE + signal_id.len());
                buf.put_u64_le(*numeric_id);
                buf.put_slice(signal_id.as_bytes());
            }
            Message::SubscribeAck { numeric_id } | Message::UnsubscribeAck { numeric_id } => {
                buf.put_u64_le(*numeric_id);
            }
            Message::ProtocolInitRequest { client_type } => {
                buf.put_u8(client_type.code());
            }
            Message::ProtocolInitDone => {}
            Message::ConnectionRejected { reason, message } => {
                buf.put_u8(reason.code());
                buf.put_slice(message.as_bytes());
            }
            Message::Packet(packet) => {
                buf.put_slice(&packet.encode_header());
                buf.put_slice(&packet.payload_bytes());
            }
            Message::Config(packet) => {
                packet.encode(&mut buf);
            }
        }
        Ok(buf.freeze())
    }

    /// Encode as a complete transport frame
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let payload = self.encode_payload()?;
        encode_frame(self.payload_type(), &payload)
    }

    /// Decode a complete frame payload of the given type
    pub fn decode(kind: PayloadType, mut payload: Bytes) -> Result<Self, ProtocolError> {
        match kind {
            PayloadType::SignalAvailable => {
                let numeric_id = read_numeric_id(kind, &mut payload)?;
                ensure(kind, &payload, STRING_LEN_PREFIX_SIZE)?;
                let id_len = payload.get_u16_le() as usize;
                ensure(kind, &payload, id_len)?;
                let signal_id = read_string(payload.split_to(id_len), "signal id")?;
                let serialized = read_string(payload, "serialized signal")?;
                Ok(Message::SignalAvailable {
                    numeric_id,
                    signal_id,
                    serialized,
                })
            }
            PayloadType::SignalUnavailable => {
                let numeric_id = read_numeric_id(kind, &mut payload)?;
                let signal_id = read_string(payload, "signal id")?;
                Ok(Message::SignalUnavailable {
                    numeric_id,
                    signal_id,
                })
            }
            PayloadType::Subscribe => {
                let numeric_id = read_numeric_id(kind, &mut payload)?;
                let signal_id = read_string(payload, "signal id")?;
                Ok(Message::Subscribe {
                    numeric_id,
                    signal_id,
                })
            }
            PayloadType::Unsubscribe => {
                let numeric_id = read_numeric_id(kind, &mut payload)?;
                let signal_id = read_string(payload, "signal id")?;
                Ok(Message::Unsubscribe {
                    numeric_id,
                    signal_id,
                })
            }
            PayloadType::SubscribeAck => Ok(Message::SubscribeAck {
                numeric_id: read_numeric_id(kind, &mut payload)?,
            }),
            PayloadType::UnsubscribeAck => Ok(Message::UnsubscribeAck {
                numeric_id: read_numeric_id(kind, &mut payload)?,
            }),
            PayloadType::ProtocolInitRequest => {
                ensure(kind, &payload, 1)?;
                Ok(Message::ProtocolInitRequest {
                    client_type: ClientType::from_code(payload.get_u8())?,
                })
            }
            PayloadType::ProtocolInitDone => Ok(Message::ProtocolInitDone),
            PayloadType::ConnectionRejected => {
                ensure(kind, &payload, 1)?;
                let reason = RejectReason::from_code(payload.get_u8())?;
                Ok(Message::ConnectionRejected {
                    reason,
                    message: read_string(payload, "reject message")?,
                })
            }
            PayloadType::StreamingPacket => Ok(Message::Packet(PacketBuffer::decode(payload)?)),
            PayloadType::ConfigurationPacket => Ok(Message::Config(ConfigPacket::decode(payload)?)),
        }
    }
}

fn ensure(kind: PayloadType, buf: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            kind: kind.name(),
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn read_numeric_id(kind: PayloadType, buf: &mut Bytes) -> Result<u64, ProtocolError> {
    ensure(kind, buf, NUMERIC_ID_SIZE)?;
    Ok(buf.get_u64_le())
}

fn read_string(buf: Bytes, field: &'static str) -> Result<String, ProtocolError> {
    String::from_utf8(buf.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::TransportHeader;
    use crate::protocol::packet::GenericPacketHeader;

    /// Encode, then split the frame back into header + payload and decode
    fn round_trip(message: &Message) -> Message {
        let frame = message.encode().unwrap();
        let header = TransportHeader::decode(&frame).unwrap();
        assert_eq!(
            header.payload_length as usize,
            frame.len() - TRANSPORT_HEADER_SIZE
        );
        let payload = frame.slice(TRANSPORT_HEADER_SIZE..);
        Message::decode(header.kind().unwrap(), payload).unwrap()
    }

    #[test]
    fn test_signal_available_round_trip() {
        let decoded = round_trip(&Message::SignalAvailable {
            numeric_id: 3,
            signal_id: "/dev/ai0/value".into(),
            serialized: "{\"__type\":\"Signal\"}".into(),
        });

        match decoded {
            Message::SignalAvailable {
                numeric_id,
                signal_id,
                serialized,
            } => {
                assert_eq!(numeric_id, 3);
                assert_eq!(signal_id, "/dev/ai0/value");
                assert_eq!(serialized, "{\"__type\":\"Signal\"}");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_signal_available_layout() {
        let payload = Message::SignalAvailable {
            numeric_id: 1,
            signal_id: "ab".into(),
            serialized: "xyz".into(),
        }
        .encode_payload()
        .unwrap();

        assert_eq!(&payload[0..8], &1u64.to_le_bytes());
        assert_eq!(&payload[8..10], &2u16.to_le_bytes());
        assert_eq!(&payload[10..12], b"ab");
        assert_eq!(&payload[12..], b"xyz");
    }

    #[test]
    fn test_signal_available_empty_serialized() {
        let decoded = round_trip(&Message::SignalAvailable {
            numeric_id: 9,
            signal_id: "sig".into(),
            serialized: String::new(),
        });
        assert!(matches!(
            decoded,
            Message::SignalAvailable { ref serialized, .. } if serialized.is_empty()
        ));
    }

    #[test]
    fn test_commands_round_trip() {
        let decoded = round_trip(&Message::Subscribe {
            numeric_id: 10,
            signal_id: "/dev/sig".into(),
        });
        assert!(matches!(
            decoded,
            Message::Subscribe { numeric_id: 10, ref signal_id } if signal_id == "/dev/sig"
        ));

        let decoded = round_trip(&Message::Unsubscribe {
            numeric_id: 11,
            signal_id: "/dev/sig".into(),
        });
        assert!(matches!(decoded, Message::Unsubscribe { numeric_id: 11, .. }));

        let decoded = round_trip(&Message::SignalUnavailable {
            numeric_id: 12,
            signal_id: String::new(),
        });
        assert!(matches!(
            decoded,
            Message::SignalUnavailable { numeric_id: 12, ref signal_id } if signal_id.is_empty()
        ));
    }

    #[test]
    fn test_acks_round_trip() {
        let decoded = round_trip(&Message::SubscribeAck { numeric_id: u64::MAX });
        assert!(matches!(decoded, Message::SubscribeAck { numeric_id: u64::MAX }));

        let decoded = round_trip(&Message::UnsubscribeAck { numeric_id: 0 });
        assert!(matches!(decoded, Message::UnsubscribeAck { numeric_id: 0 }));
    }

    #[test]
    fn test_init_and_reject_round_trip() {
        let decoded = round_trip(&Message::ProtocolInitRequest {
            client_type: ClientType::ExclusiveControl,
        });
        assert!(matches!(
            decoded,
            Message::ProtocolInitRequest {
                client_type: ClientType::ExclusiveControl
            }
        ));

        let frame = Message::ProtocolInitDone.encode().unwrap();
        assert_eq!(frame.len(), TRANSPORT_HEADER_SIZE);
        assert!(matches!(round_trip(&Message::ProtocolInitDone), Message::ProtocolInitDone));

        let decoded = round_trip(&Message::ConnectionRejected {
            reason: RejectReason::ControlRejected,
            message: "exclusive control client already connected".into(),
        });
        assert!(matches!(
            decoded,
            Message::ConnectionRejected {
                reason: RejectReason::ControlRejected,
                ..
            }
        ));
    }

    #[test]
    fn test_packets_round_trip() {
        let packet = PacketBuffer::owned(
            GenericPacketHeader::new(1, 5, 0),
            Bytes::from_static(&[9, 8, 7]),
        );
        match round_trip(&Message::Packet(packet)) {
            Message::Packet(decoded) => {
                assert_eq!(decoded.signal_id(), 5);
                assert_eq!(decoded.payload_bytes(), Bytes::from_static(&[9, 8, 7]));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let config = ConfigPacket::new(2, 77, Bytes::from_static(b"reply"));
        match round_trip(&Message::Config(config.clone())) {
            Message::Config(decoded) => assert_eq!(decoded, config),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_command() {
        let err = Message::decode(PayloadType::Subscribe, Bytes::from_static(&[1, 2, 3])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                kind: "subscribe",
                needed: 8,
                available: 3
            }
        );
    }

    #[test]
    fn test_signal_available_string_length_overrun() {
        let mut raw = BytesMut::new();
        raw.put_u64_le(1);
        raw.put_u16_le(50);
        raw.put_slice(b"short");

        let err = Message::decode(PayloadType::SignalAvailable, raw.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 50, .. }));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut raw = BytesMut::new();
        raw.put_u64_le(1);
        raw.put_slice(&[0xff, 0xfe]);

        let err = Message::decode(PayloadType::Unsubscribe, raw.freeze()).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidUtf8("signal id"));
    }

    #[test]
    fn test_invalid_client_type() {
        let err = Message::decode(PayloadType::ProtocolInitRequest, Bytes::from_static(&[9])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidValue {
                field: "client type",
                value: 9
            }
        );
    }
}
