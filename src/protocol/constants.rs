//! Wire protocol constants

/// Size of the transport frame header (type byte + u32 length)
pub const TRANSPORT_HEADER_SIZE: usize = 5;

/// Protocol-wide ceiling for a single frame payload
pub const MAX_PAYLOAD_SIZE: u32 = 0x0FFF_FFFF;

/// Size of the numeric signal id carried by commands
pub const NUMERIC_ID_SIZE: usize = 8;

/// Size of the explicit length prefix in front of the first of two strings
pub const STRING_LEN_PREFIX_SIZE: usize = 2;

/// Size of [`GenericPacketHeader`](super::packet::GenericPacketHeader) on the wire
pub const GENERIC_PACKET_HEADER_SIZE: usize = 16;

/// Size of [`ConfigPacketHeader`](super::packet::ConfigPacketHeader) on the wire
pub const CONFIG_PACKET_HEADER_SIZE: usize = 16;

/// Current packet header version
pub const PACKET_HEADER_VERSION: u8 = 1;

// Streaming packet types
pub const PACKET_TYPE_DATA: u8 = 0x01;
pub const PACKET_TYPE_EVENT: u8 = 0x02;

// Payload type codes
pub const PAYLOAD_STREAMING_PACKET: u8 = 0x01;
pub const PAYLOAD_SIGNAL_AVAILABLE: u8 = 0x02;
pub const PAYLOAD_SIGNAL_UNAVAILABLE: u8 = 0x03;
pub const PAYLOAD_PROTOCOL_INIT_REQUEST: u8 = 0x04;
pub const PAYLOAD_PROTOCOL_INIT_DONE: u8 = 0x05;
pub const PAYLOAD_SUBSCRIBE: u8 = 0x06;
pub const PAYLOAD_UNSUBSCRIBE: u8 = 0x07;
pub const PAYLOAD_CONFIGURATION_PACKET: u8 = 0x08;
pub const PAYLOAD_SUBSCRIBE_ACK: u8 = 0x09;
pub const PAYLOAD_UNSUBSCRIBE_ACK: u8 = 0x0A;
pub const PAYLOAD_CONNECTION_REJECTED: u8 = 0x0B;

/// Default packet memory pool capacity per connection
pub const DEFAULT_POOL_CAPACITY: usize = 4 * 1024 * 1024;

/// Default streaming port
pub const DEFAULT_PORT: u16 = 7420;
