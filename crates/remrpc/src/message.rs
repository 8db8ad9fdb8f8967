//! # Message Catalogue
//!
//! Every kind of message two peers exchange over a session.
//!
//! ## Invariants
//! - The set is closed: `MsgType::from_u8` rejects anything else, and a `Message`
//!   can only be built from one of the variants below.
//! - Request kinds and their `*Return` kinds share the sequence id of the request.
//! - `Ping`, `Pong` and `ReleaseRef` carry sequence id 0 on the wire.

use rempack::RemoteException;
use rempack::Value;

/// Type tag written as the first byte of every message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    NameLookup = 0,
    NameLookupReturn = 1,
    InterfaceLookup = 2,
    InterfaceLookupReturn = 3,
    Invoke = 4,
    InvokeReturn = 5,
    ToString = 6,
    ToStringReturn = 7,
    Equals = 8,
    EqualsReturn = 9,
    HashCode = 10,
    HashCodeReturn = 11,
    OpenRawChannel = 12,
    OpenRawChannelReturn = 13,
    CloseRawChannel = 14,
    CloseRawChannelReturn = 15,
    RawChannelData = 16,
    RawChannelDataReturn = 17,
    Ping = 18,
    Pong = 19,
    Error = 20,
    ReleaseRef = 21,
    AsyncFinished = 22,
}

impl MsgType {
    pub const ALL: [MsgType; 23] = [
        MsgType::NameLookup,
        MsgType::NameLookupReturn,
        MsgType::InterfaceLookup,
        MsgType::InterfaceLookupReturn,
        MsgType::Invoke,
        MsgType::InvokeReturn,
        MsgType::ToString,
        MsgType::ToStringReturn,
        MsgType::Equals,
        MsgType::EqualsReturn,
        MsgType::HashCode,
        MsgType::HashCodeReturn,
        MsgType::OpenRawChannel,
        MsgType::OpenRawChannelReturn,
        MsgType::CloseRawChannel,
        MsgType::CloseRawChannelReturn,
        MsgType::RawChannelData,
        MsgType::RawChannelDataReturn,
        MsgType::Ping,
        MsgType::Pong,
        MsgType::Error,
        MsgType::ReleaseRef,
        MsgType::AsyncFinished,
    ];

    /// Returns the kind for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }

    /// True for the kinds that answer a request and are routed by sequence id.
    pub fn is_return(self) -> bool {
        matches!(
            self,
            MsgType::NameLookupReturn
                | MsgType::InterfaceLookupReturn
                | MsgType::InvokeReturn
                | MsgType::ToStringReturn
                | MsgType::EqualsReturn
                | MsgType::HashCodeReturn
                | MsgType::OpenRawChannelReturn
                | MsgType::CloseRawChannelReturn
                | MsgType::RawChannelDataReturn
        )
    }
}

/// A fully decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    NameLookup { seq: u64, name: String },
    NameLookupReturn { seq: u64, interfaces: Vec<String>, error: Option<String> },
    InterfaceLookup { seq: u64, interface: String },
    InterfaceLookupReturn { seq: u64, name: String, interfaces: Vec<String>, error: Option<String> },
    Invoke { seq: u64, object: String, method: u64, args: Vec<Value> },
    InvokeReturn { seq: u64, value: Value },
    ToString { seq: u64, object: String },
    ToStringReturn { seq: u64, value: String, error: Option<String> },
    Equals { seq: u64, object: String, other: Value },
    EqualsReturn { seq: u64, value: bool, error: Option<String> },
    HashCode { seq: u64, object: String },
    HashCodeReturn { seq: u64, value: i32, error: Option<String> },
    OpenRawChannel { seq: u64, token: u32 },
    OpenRawChannelReturn { seq: u64, accepted: bool },
    CloseRawChannel { seq: u64, token: u32 },
    CloseRawChannelReturn { seq: u64, closed: bool, error: Option<String> },
    RawChannelData { seq: u64, token: u32, data: Vec<u8> },
    RawChannelDataReturn { seq: u64, error: Option<String> },
    Ping,
    Pong,
    /// A fault that terminates the session.
    ///
    /// `decode_error` is true when the fault was raised while decoding locally,
    /// false when the peer reported it.
    Error {
        seq: u64,
        object: Option<String>,
        message: String,
        cause: Option<RemoteException>,
        decode_error: bool,
    },
    ReleaseRef { id: String },
    /// Completion of a deferred result. `id` travels in the sequence slot.
    AsyncFinished { id: u64, value: Value, thrown: Option<RemoteException> },
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::NameLookup { .. } => MsgType::NameLookup,
            Message::NameLookupReturn { .. } => MsgType::NameLookupReturn,
            Message::InterfaceLookup { .. } => MsgType::InterfaceLookup,
            Message::InterfaceLookupReturn { .. } => MsgType::InterfaceLookupReturn,
            Message::Invoke { .. } => MsgType::Invoke,
            Message::InvokeReturn { .. } => MsgType::InvokeReturn,
            Message::ToString { .. } => MsgType::ToString,
            Message::ToStringReturn { .. } => MsgType::ToStringReturn,
            Message::Equals { .. } => MsgType::Equals,
            Message::EqualsReturn { .. } => MsgType::EqualsReturn,
            Message::HashCode { .. } => MsgType::HashCode,
            Message::HashCodeReturn { .. } => MsgType::HashCodeReturn,
            Message::OpenRawChannel { .. } => MsgType::OpenRawChannel,
            Message::OpenRawChannelReturn { .. } => MsgType::OpenRawChannelReturn,
            Message::CloseRawChannel { .. } => MsgType::CloseRawChannel,
            Message::CloseRawChannelReturn { .. } => MsgType::CloseRawChannelReturn,
            Message::RawChannelData { .. } => MsgType::RawChannelData,
            Message::RawChannelDataReturn { .. } => MsgType::RawChannelDataReturn,
            Message::Ping => MsgType::Ping,
            Message::Pong => MsgType::Pong,
            Message::Error { .. } => MsgType::Error,
            Message::ReleaseRef { .. } => MsgType::ReleaseRef,
            Message::AsyncFinished { .. } => MsgType::AsyncFinished,
        }
    }

    /// The value written into the sequence slot of the header.
    pub fn seq(&self) -> u64 {
        match self {
            Message::NameLookup { seq, .. }
            | Message::NameLookupReturn { seq, .. }
            | Message::InterfaceLookup { seq, .. }
            | Message::InterfaceLookupReturn { seq, .. }
            | Message::Invoke { seq, .. }
            | Message::InvokeReturn { seq, .. }
            | Message::ToString { seq, .. }
            | Message::ToStringReturn { seq, .. }
            | Message::Equals { seq, .. }
            | Message::EqualsReturn { seq, .. }
            | Message::HashCode { seq, .. }
            | Message::HashCodeReturn { seq, .. }
            | Message::OpenRawChannel { seq, .. }
            | Message::OpenRawChannelReturn { seq, .. }
            | Message::CloseRawChannel { seq, .. }
            | Message::CloseRawChannelReturn { seq, .. }
            | Message::RawChannelData { seq, .. }
            | Message::RawChannelDataReturn { seq, .. }
            | Message::Error { seq, .. } => *seq,
            Message::AsyncFinished { id, .. } => *id,
            Message::Ping | Message::Pong | Message::ReleaseRef { .. } => 0,
        }
    }

    pub fn is_return(&self) -> bool {
        self.msg_type().is_return()
    }

    /// Builds a locally raised decode fault.
    pub fn decode_fault(seq: u64, message: impl Into<String>) -> Self {
        Message::Error {
            seq,
            object: None,
            message: message.into(),
            cause: None,
            decode_error: true,
        }
    }
}
