//! Error types for the STB control protocol.

use thiserror::Error;

/// Protocol-level errors that can occur while framing or reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid magic bytes in a binary frame header.
    #[error("Invalid magic bytes: expected 'GCDH', got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Header claims a payload length outside `[0, MAX_PAYLOAD_SIZE]`.
    #[error("Payload length out of bounds: {0}")]
    PayloadOutOfBounds(i64),

    /// Envelope body does not fit in the 7-digit length field.
    #[error("Envelope body too large: {0} bytes (max: 9999999)")]
    EnvelopeTooLarge(usize),

    /// Envelope prefix is malformed.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No forward progress while reading an exact byte count.
    #[error("Read stalled: expected {expected} bytes, got {received}")]
    Stalled { expected: usize, received: usize },

    /// A command body could not be serialized.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// Returns true for errors that mean the byte stream lost frame sync.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMagic(_) | ProtocolError::PayloadOutOfBounds(_)
        )
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(e.to_string()),
        }
    }
}
