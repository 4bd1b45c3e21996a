//! Error types
//!
//! A single crate-wide error enum. Wire faults are grouped under
//! [`ProtocolError`]; everything else describes a local precondition the
//! caller violated and never tears a connection down.

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed frame or payload; fatal for the connection
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation not valid in the current state (caller bug)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown or unregistered signal
    #[error("not found: {0}")]
    NotFound(String),

    /// Item already present
    #[error("duplicate item: {0}")]
    DuplicateItem(String),

    /// Packet memory pool has no free bytes
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Required argument missing
    #[error("argument null: {0}")]
    ArgumentNull(&'static str),

    /// Argument present but not acceptable
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Peer refused the connection during admission
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),

    /// The session is closed; nothing can be queued
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error requires tearing the connection down
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Io(_) | Error::ConnectionClosed(_)
        )
    }
}

/// Wire-level faults
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Declared payload length exceeds the protocol ceiling
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge { len: u32, max: u32 },

    /// Payload type byte not known to this implementation
    #[error("unknown payload type 0x{0:02x}")]
    UnknownPayloadType(u8),

    /// Payload shorter than its fixed fields
    #[error("{kind} payload truncated: need {needed} bytes, have {available}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        available: usize,
    },

    /// Packet header declares a size other than the one we parse
    #[error("{kind} header size mismatch: declared {declared}, expected {expected}")]
    HeaderSizeMismatch {
        kind: &'static str,
        declared: u8,
        expected: u8,
    },

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Enumerated field has an out-of-range value
    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let protocol: Error = ProtocolError::UnknownPayloadType(0x7f).into();
        assert!(protocol.is_connection_fatal());

        let io: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(io.is_connection_fatal());

        assert!(!Error::InvalidState("double unsubscribe".into()).is_connection_fatal());
        assert!(!Error::NotFound("/dev/sig".into()).is_connection_fatal());
        assert!(!Error::DuplicateItem("/dev/sig".into()).is_connection_fatal());
        assert!(!Error::ResourceExhausted("pool".into()).is_connection_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::from(ProtocolError::PayloadTooLarge { len: 10, max: 5 });
        assert_eq!(
            err.to_string(),
            "protocol error: payload length 10 exceeds maximum 5"
        );

        let err = Error::ArgumentNull("signal id");
        assert_eq!(err.to_string(), "argument null: signal id");
    }
}
