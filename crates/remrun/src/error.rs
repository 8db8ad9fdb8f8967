//! Call-site errors.
//!
//! A proxy call returns a value or one of these. Only `Remote` carries an
//! exception the callee declared; everything else is the runtime's own failure.

use rempack::RemoteException;
use remrpc::Message;

use crate::raw;
use crate::session::SessionError;

#[derive(Debug, Clone)]
pub enum CallError {
    /// The callee raised an exception declared on the method.
    Remote(RemoteException),
    /// The call failed for a reason the method does not declare.
    Invocation { signature: String, cause: RemoteException },
    /// The peer could not resolve a name, interface or reference.
    Lookup(String),
    /// The session ended before the reply arrived.
    Session(SessionError),
    /// No reply within the configured call timeout.
    Timeout,
    /// The request could not be encoded. Nothing was sent.
    Codec(remrpc::Error),
    /// The proxy was released before the call.
    Released(String),
    RawChannel(raw::Error),
    /// The reply did not have the expected shape.
    Unexpected(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "Remote exception: {}", e),
            Self::Invocation { signature, cause } => {
                write!(f, "Remote invocation of '{}' failed: {}", signature, cause)
            }
            Self::Lookup(msg) => write!(f, "Lookup failed: {}", msg),
            Self::Session(e) => write!(f, "Session failed: {}", e),
            Self::Timeout => write!(f, "Call timed out"),
            Self::Codec(e) => write!(f, "Encoding failed: {}", e),
            Self::Released(id) => write!(f, "Proxy for '{}' was released", id),
            Self::RawChannel(e) => write!(f, "Raw channel error: {}", e),
            Self::Unexpected(what) => write!(f, "Unexpected reply: {}", what),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Invocation { cause, .. } => Some(cause),
            Self::Session(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::RawChannel(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SessionError> for CallError {
    fn from(e: SessionError) -> Self { Self::Session(e) }
}

impl From<remrpc::Error> for CallError {
    fn from(e: remrpc::Error) -> Self { Self::Codec(e) }
}

impl From<raw::Error> for CallError {
    fn from(e: raw::Error) -> Self { Self::RawChannel(e) }
}

impl CallError {
    /// For a reply message of the wrong kind.
    pub fn unexpected(reply: &Message) -> Self {
        Self::Unexpected(format!("{:?}", reply.msg_type()))
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
