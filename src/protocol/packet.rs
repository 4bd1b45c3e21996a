//! Packet buffers carried by STREAMING_PACKET and CONFIGURATION_PACKET frames
//!
//! Both packet kinds start with a fixed 16-byte header whose first byte is
//! the header's own size. A size that doesn't match the struct we parse
//! means offsets in the stream can no longer be trusted, so the decoder
//! reports it as a connection-fatal [`ProtocolError::HeaderSizeMismatch`].
//!
//! ```text
//! GenericPacketHeader                 ConfigPacketHeader
//! 0  header_size  u8                  0  header_size  u8
//! 1  packet_type  u8                  1  packet_type  u8
//! 2  version      u8                  2  version      u8
//! 3  flags        u8                  3  reserved     u8
//! 4  payload_size u32 LE              4  payload_size u32 LE
//! 8  signal_id    u64 LE              8  request_id   u64 LE
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::error::ProtocolError;
use crate::pool::PoolRegion;

/// Fixed header in front of every streaming packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericPacketHeader {
    /// Application-defined packet kind (data, event, ...)
    pub packet_type: u8,
    pub version: u8,
    pub flags: u8,
    pub payload_size: u32,
    /// Numeric id of the signal the packet belongs to
    pub signal_id: u64,
}

impl GenericPacketHeader {
    pub fn new(packet_type: u8, signal_id: u64, payload_size: u32) -> Self {
        Self {
            packet_type,
            version: PACKET_HEADER_VERSION,
            flags: 0,
            payload_size,
            signal_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(GENERIC_PACKET_HEADER_SIZE as u8);
        buf.put_u8(self.packet_type);
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.payload_size);
        buf.put_u64_le(self.signal_id);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        if buf.remaining() < GENERIC_PACKET_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                kind: "packet header",
                needed: GENERIC_PACKET_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let declared = buf.get_u8();
        if declared as usize != GENERIC_PACKET_HEADER_SIZE {
            return Err(ProtocolError::HeaderSizeMismatch {
                kind: "packet",
                declared,
                expected: GENERIC_PACKET_HEADER_SIZE as u8,
            });
        }

        Ok(Self {
            packet_type: buf.get_u8(),
            version: buf.get_u8(),
            flags: buf.get_u8(),
            payload_size: buf.get_u32_le(),
            signal_id: buf.get_u64_le(),
        })
    }
}

/// Fixed header in front of a configuration packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigPacketHeader {
    pub packet_type: u8,
    pub version: u8,
    pub payload_size: u32,
    /// Correlates a reply with its request
    pub request_id: u64,
}

impl ConfigPacketHeader {
    pub fn new(packet_type: u8, request_id: u64, payload_size: u32) -> Self {
        Self {
            packet_type,
            version: PACKET_HEADER_VERSION,
            payload_size,
            request_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(CONFIG_PACKET_HEADER_SIZE as u8);
        buf.put_u8(self.packet_type);
        buf.put_u8(self.version);
        buf.put_u8(0);
        buf.put_u32_le(self.payload_size);
        buf.put_u64_le(self.request_id);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        if buf.remaining() < CONFIG_PACKET_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                kind: "configuration packet header",
                needed: CONFIG_PACKET_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let declared = buf.get_u8();
        if declared as usize != CONFIG_PACKET_HEADER_SIZE {
            return Err(ProtocolError::HeaderSizeMismatch {
                kind: "configuration packet",
                declared,
                expected: CONFIG_PACKET_HEADER_SIZE as u8,
            });
        }

        let packet_type = buf.get_u8();
        let version = buf.get_u8();
        let _reserved = buf.get_u8();
        Ok(Self {
            packet_type,
            version,
            payload_size: buf.get_u32_le(),
            request_id: buf.get_u64_le(),
        })
    }
}

/// Memory backing a packet payload
#[derive(Debug)]
pub enum PacketPayload {
    /// Heap memory owned by the packet (received packets)
    Owned(Bytes),
    /// Region loaned from a [`PacketMemoryPool`](crate::pool::PacketMemoryPool);
    /// returned to the pool when the packet is dropped
    Pooled(PoolRegion),
}

impl PacketPayload {
    pub fn len(&self) -> usize {
        match self {
            PacketPayload::Owned(bytes) => bytes.len(),
            PacketPayload::Pooled(region) => region.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the payload bytes
    pub fn to_bytes(&self) -> Bytes {
        match self {
            PacketPayload::Owned(bytes) => bytes.clone(),
            PacketPayload::Pooled(region) => region.to_bytes(),
        }
    }
}

/// A streaming packet: header plus optional payload
#[derive(Debug)]
pub struct PacketBuffer {
    pub header: GenericPacketHeader,
    pub payload: Option<PacketPayload>,
}

impl PacketBuffer {
    /// Packet over freshly received (owned) bytes
    pub fn owned(header: GenericPacketHeader, payload: Bytes) -> Self {
        let payload = if payload.is_empty() {
            None
        } else {
            Some(PacketPayload::Owned(payload))
        };
        Self { header, payload }
    }

    /// Packet over a pool region; `payload_size` is taken from the region
    pub fn pooled(packet_type: u8, signal_id: u64, region: PoolRegion) -> Self {
        let header = GenericPacketHeader::new(packet_type, signal_id, region.len() as u32);
        Self {
            header,
            payload: Some(PacketPayload::Pooled(region)),
        }
    }

    pub fn signal_id(&self) -> u64 {
        self.header.signal_id
    }

    pub fn payload_bytes(&self) -> Bytes {
        self.payload
            .as_ref()
            .map(PacketPayload::to_bytes)
            .unwrap_or_default()
    }

    /// Total encoded size (header + payload)
    pub fn encoded_len(&self) -> usize {
        GENERIC_PACKET_HEADER_SIZE + self.payload.as_ref().map_or(0, PacketPayload::len)
    }

    /// Encode the packet header; the payload is written separately so a
    /// pooled region stays loaned until the write completes
    pub fn encode_header(&self) -> Bytes {
        let mut header = self.header;
        header.payload_size = self.payload.as_ref().map_or(0, PacketPayload::len) as u32;
        let mut buf = BytesMut::with_capacity(GENERIC_PACKET_HEADER_SIZE);
        header.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a packet from a complete frame payload
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        let header = GenericPacketHeader::decode(&mut payload)?;
        let size = header.payload_size as usize;
        if payload.remaining() < size {
            return Err(ProtocolError::Truncated {
                kind: "packet payload",
                needed: size,
                available: payload.remaining(),
            });
        }
        Ok(Self::owned(header, payload.split_to(size)))
    }
}

/// A configuration packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPacket {
    pub header: ConfigPacketHeader,
    pub payload: Bytes,
}

impl ConfigPacket {
    pub fn new(packet_type: u8, request_id: u64, payload: Bytes) -> Self {
        let header = ConfigPacketHeader::new(packet_type, request_id, payload.len() as u32);
        Self { header, payload }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut header = self.header;
        header.payload_size = self.payload.len() as u32;
        header.encode(buf);
        buf.put_slice(&self.payload);
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        let header = ConfigPacketHeader::decode(&mut payload)?;
        let size = header.payload_size as usize;
        if payload.remaining() < size {
            return Err(ProtocolError::Truncated {
                kind: "configuration packet payload",
                needed: size,
                available: payload.remaining(),
            });
        }
        Ok(Self {
            header,
            payload: payload.split_to(size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_packet(packet: &PacketBuffer) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&packet.encode_header());
        buf.put_slice(&packet.payload_bytes());
        buf.freeze()
    }

    #[test]
    fn test_packet_round_trip() {
        let header = GenericPacketHeader::new(1, 42, 0);
        let packet = PacketBuffer::owned(header, Bytes::from_static(&[1, 2, 3, 4]));

        let decoded = PacketBuffer::decode(encode_packet(&packet)).unwrap();
        assert_eq!(decoded.signal_id(), 42);
        assert_eq!(decoded.header.packet_type, 1);
        assert_eq!(decoded.header.payload_size, 4);
        assert_eq!(decoded.payload_bytes(), Bytes::from_static(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_empty_packet_has_no_payload() {
        let packet = PacketBuffer::owned(GenericPacketHeader::new(2, 7, 0), Bytes::new());
        assert!(packet.payload.is_none());
        assert_eq!(packet.encoded_len(), GENERIC_PACKET_HEADER_SIZE);

        let decoded = PacketBuffer::decode(encode_packet(&packet)).unwrap();
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_header_size_mismatch_is_reported() {
        let mut raw = BytesMut::new();
        GenericPacketHeader::new(1, 1, 0).encode(&mut raw);
        raw[0] = 24;

        let err = PacketBuffer::decode(raw.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::HeaderSizeMismatch { declared: 24, .. }
        ));
    }

    #[test]
    fn test_truncated_packet_payload() {
        let mut raw = BytesMut::new();
        GenericPacketHeader::new(1, 1, 100).encode(&mut raw);
        raw.put_slice(&[0u8; 10]);

        let err = PacketBuffer::decode(raw.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 100,
                available: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_config_packet_round_trip() {
        let packet = ConfigPacket::new(3, 0xDEAD_BEEF, Bytes::from_static(b"{\"rpc\":1}"));
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(buf.len(), CONFIG_PACKET_HEADER_SIZE + 9);

        let decoded = ConfigPacket::decode(buf.freeze()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.header.request_id, 0xDEAD_BEEF);
    }
}
