//! # Transport Abstraction
//!
//! A minimal, async interface for moving framed messages between two peers.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about message kinds or values.
//!   It moves opaque, already-framed buffers.
//! - **Full Duplex**: Sending and receiving are independent. The dispatcher pumps
//!   `recv` on one task while any number of tasks `send`.

pub mod mem;
pub mod tcp;

use std::fmt;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The transport was closed locally.
    Closed,
    /// A frame exceeded the configured maximum length.
    FrameTooLarge(usize),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Closed => write!(f, "Transport closed"),
            Self::FrameTooLarge(len) => write!(f, "Frame of {} bytes exceeds limit", len),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional message pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one complete message.
    ///
    /// # Invariants
    /// - Concurrent calls must not interleave the bytes of different messages.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next complete message.
    ///
    /// Returns `Ok(None)` once the peer has hung up.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the transport. The peer observes end of stream.
    async fn close(&self);
}
