//! Signal collaborators
//!
//! The streaming layer never looks inside a signal. Publishers hand it a
//! [`Signal`] that can describe itself as an opaque string; consumers hand
//! it a [`MirroredSignal`] that receives packets for a remote signal.

use crate::protocol::packet::PacketBuffer;

/// A signal published over a connection
pub trait Signal: Send + Sync {
    /// Global, protocol-independent identity
    fn global_id(&self) -> String;

    /// Serialized description sent with the availability announcement
    fn serialize(&self) -> String;
}

/// Local proxy of a signal that lives on the peer
pub trait MirroredSignal: Send + Sync {
    /// Identity of the remote signal
    fn remote_id(&self) -> String;

    /// A packet arrived for this signal
    fn on_packet(&self, packet: PacketBuffer);
}
