//! Error types
//!
//! Errors are grouped by the layer that raises them. Most protocol-level
//! problems never surface as errors at all: the handshake falls back to the
//! plain format, AMF decoding stops early and unknown messages are skipped.
//! What remains here ends a single session, never the server.

use std::fmt;
use std::io;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or listener I/O failure
    Io(io::Error),
    /// Handshake could not be completed
    Handshake(HandshakeError),
    /// Chunk stream or message framing violation
    Protocol(ProtocolError),
    /// AMF0 value could not be decoded
    Amf(AmfError),
    /// Registry rejected an operation
    Registry(RegistryError),
    /// Handshake or read did not complete in time
    Timeout,
    /// Peer or registry closed the session
    ConnectionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Handshake failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Input shorter than a full C1 signature
    ShortSignature(usize),
    /// HMAC key rejected by the MAC implementation
    InvalidKey,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::ShortSignature(len) => {
                write!(f, "Handshake signature too short: {} bytes", len)
            }
            HandshakeError::InvalidKey => write!(f, "Invalid HMAC key"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Chunk and message framing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared message length exceeds the sanity limit
    MessageTooLarge(u32),
    /// Control message payload shorter than its fixed layout
    TruncatedControl { type_id: u8, len: usize },
    /// Chunk header could not be written (csid out of range)
    InvalidChunkStreamId(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MessageTooLarge(len) => write!(f, "Message too large: {} bytes", len),
            ProtocolError::TruncatedControl { type_id, len } => {
                write!(f, "Control message {} truncated at {} bytes", type_id, len)
            }
            ProtocolError::InvalidChunkStreamId(csid) => {
                write!(f, "Invalid chunk stream id: {}", csid)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 decoding failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    /// Value ended before its declared length
    UnexpectedEof,
    /// String bytes were not valid UTF-8
    InvalidUtf8,
    /// Objects or arrays nested deeper than the decoder allows
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::from(AmfError::UnexpectedEof).to_string(),
            "AMF error: Unexpected end of AMF data"
        );
        assert_eq!(
            HandshakeError::ShortSignature(8).to_string(),
            "Handshake signature too short: 8 bytes"
        );
        assert_eq!(Error::Timeout.to_string(), "Operation timed out");
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
