//! # Error Definitions
//!
//! Failures while turning messages into bytes and back.

use rempack::Error as PackError;

use crate::message::MsgType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying cursor or object serializer failed.
    Pack(PackError),
    /// The type byte of a message does not name a known kind.
    UnknownType(u8),
    /// No body codec is registered for a known kind.
    Unregistered(MsgType),
    /// The internal structure of the message was malformed.
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "serialization failed: {}", e),
            Self::UnknownType(b) => write!(f, "unknown message type {:#04x}", b),
            Self::Unregistered(ty) => write!(f, "no body codec registered for {:?}", ty),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Pack(e) }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
