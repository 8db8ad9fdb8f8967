//! Session identity and terminal session states.

/// Strong type for session identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Why a session stopped. Recorded once, by whichever cause arrives first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Closed locally or by the peer hanging up.
    Closed,
    /// No pong within the keepalive deadline.
    LinkFailure,
    /// A received message could not be decoded.
    Decode(String),
    /// The peer reported a fault.
    Protocol(String),
    /// The transport failed underneath the session.
    Transport(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "session closed"),
            Self::LinkFailure => write!(f, "link failure: no pong within deadline"),
            Self::Decode(msg) => write!(f, "decode fault: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol fault: {}", msg),
            Self::Transport(msg) => write!(f, "transport failure: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}
