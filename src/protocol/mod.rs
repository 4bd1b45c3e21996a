//! Wire protocol
//!
//! Pure, state-free encode/decode of the transport frame and its typed
//! payloads. Nothing in here performs I/O.

pub mod constants;
pub mod frame;
pub mod message;
pub mod packet;

pub use frame::{PayloadType, TransportHeader};
pub use message::{ClientType, Message, RejectReason};
pub use packet::{ConfigPacket, ConfigPacketHeader, GenericPacketHeader, PacketBuffer, PacketPayload};
