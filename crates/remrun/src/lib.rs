//! # Remrun
//!
//! Remote object invocation over persistent, bidirectional sessions.
//!
//! A `Runtime` binds local objects by name. A peer connects, resolves a name
//! or an interface to a `RemoteProxy`, and invokes methods on it as if the
//! object were local. Either side may pass its own objects along as
//! arguments or results; they are exported as callbacks and called back over
//! the same session.
//!
//! ## Architecture
//!
//! - **rempack**: the value model and its binary serializer.
//! - **remrpc**: message kinds, headers and the per-kind body codec.
//! - **remrun** (this crate): sessions, dispatch, lookup, keepalive and proxies.
//!
//! ## Philosophy
//!
//! - **Explicit Contracts**: objects declare their interfaces and method
//!   signatures up front through `Capabilities`. Nothing is discovered by
//!   reflection at call time.
//! - **Fail the Session, Not the Process**: malformed input, a silent peer or a
//!   broken transport ends one session and releases everything waiting on it.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interface;
mod keepalive;
pub mod lookup;
pub mod object;
mod pending;
pub mod proxy;
pub mod raw;
pub mod runtime;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::CallError;
pub use interface::Capabilities;
pub use interface::Interface;
pub use interface::MethodDescriptor;
pub use interface::signature_hash;
pub use lookup::LookupTable;
pub use object::Arg;
pub use object::CallContext;
pub use object::RemoteObject;
pub use object::Returned;
pub use object::expect_args;
pub use object::invocation_error;
pub use proxy::AsyncResult;
pub use proxy::RemoteProxy;
pub use proxy::Reply;
pub use raw::RawChannel;
pub use raw::RawChannelListener;
pub use raw::RawChannelRegistry;
pub use runtime::Runtime;
pub use session::SessionError;
pub use session::SessionId;
pub use transport::Transport;
pub use transport::mem::DuplexTransport;
pub use transport::tcp::TcpTransport;

pub use rempack::RemoteException;
pub use rempack::Value;
