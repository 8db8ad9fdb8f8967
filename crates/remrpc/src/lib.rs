//! # RemRPC
//!
//! The wire protocol for remote object invocation over a persistent session.
//!
//! ## Architecture
//!
//! A message is `[type][seq][body]`. The `Codec` owns one `BodyCodec` per kind,
//! so the field layout of each kind lives next to its peers instead of inside a
//! monolithic switch. Application payloads are delegated to a
//! `rempack::ObjectSerializer` and embedded as opaque, length-prefixed blobs.
//!
//! Decoding is total: malformed input never escapes as a panic or an error to
//! the transport, it becomes a `Message::Error` the dispatcher acts on.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;


pub use codec::BodyCodec;
pub use codec::Codec;
pub use error::Error;
pub use error::Result;
pub use message::Message;
pub use message::MsgType;
