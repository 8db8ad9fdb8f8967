//! # Remote Objects
//!
//! The server-side contract. An implementation receives the resolved method
//! descriptor and the substituted arguments, and returns either a result or a
//! thrown `RemoteException`.

use std::sync::Arc;

use futures::future::BoxFuture;
use rempack::RemoteException;
use rempack::Value;

use crate::interface::Capabilities;
use crate::interface::MethodDescriptor;
use crate::proxy::RemoteProxy;
use crate::session::SessionId;

/// Class of the generic wrapper for failures that are not the callee's own.
pub const INVOCATION_ERROR: &str = "RemoteInvocationError";
/// Class raised when a name or callback id is not registered.
pub const LOOKUP_FAILED: &str = "LookupFailed";
/// Class raised when no method matches the signature hash.
pub const NO_SUCH_METHOD: &str = "NoSuchMethod";
/// Class raised when arguments do not fit the method.
pub const ILLEGAL_ARGUMENT: &str = "IllegalArgument";
/// Class raised when an endpoint would leave the session that owns it.
pub const ENDPOINT_TRANSFER: &str = "EndpointTransfer";
/// Class raised when a result cannot be serialized.
pub const SERIALIZATION_FAILED: &str = "SerializationFailed";
/// Class recorded when the callee panicked.
pub const PANIC: &str = "Panic";

/// Where an invocation came from.
#[derive(Debug, Clone)]
pub struct CallContext {
    session: SessionId,
    object: String,
}

impl CallContext {
    pub fn new(session: SessionId, object: impl Into<String>) -> Self {
        Self { session, object: object.into() }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The bound name or callback id the call was addressed to.
    pub fn object(&self) -> &str {
        &self.object
    }
}

/// A value or object reference passed as an argument.
///
/// On the calling side `Local` objects are exported as callbacks and `Remote`
/// proxies travel as endpoint references. On the receiving side placeholders
/// are resolved back into these same shapes before the callee runs.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Local(Arc<dyn RemoteObject>),
    Remote(RemoteProxy),
}

impl Arg {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn proxy(&self) -> Option<&RemoteProxy> {
        match self {
            Arg::Remote(p) => Some(p),
            _ => None,
        }
    }

    pub fn local(&self) -> Option<&Arc<dyn RemoteObject>> {
        match self {
            Arg::Local(o) => Some(o),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Local(o) => f.debug_tuple("Local").field(&o.describe()).finish(),
            Arg::Remote(p) => f.debug_tuple("Remote").field(&p.object_name()).finish(),
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self { Arg::Value(v) }
}

impl From<RemoteProxy> for Arg {
    fn from(p: RemoteProxy) -> Self { Arg::Remote(p) }
}

impl From<Arc<dyn RemoteObject>> for Arg {
    fn from(o: Arc<dyn RemoteObject>) -> Self { Arg::Local(o) }
}

/// What a callee hands back.
pub enum Returned {
    /// The method has no result.
    Void,
    Value(Value),
    /// A remote-capable object; exported to the caller as a callback.
    Local(Arc<dyn RemoteObject>),
    /// A proxy; sent back as an endpoint reference to the object it targets.
    Remote(RemoteProxy),
    /// A deferred result; completion is pushed to the caller later.
    Deferred(BoxFuture<'static, Result<Value, RemoteException>>),
}

impl From<Value> for Returned {
    fn from(v: Value) -> Self { Returned::Value(v) }
}

impl std::fmt::Debug for Returned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Returned::Void => write!(f, "Void"),
            Returned::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Returned::Local(o) => f.debug_tuple("Local").field(&o.describe()).finish(),
            Returned::Remote(p) => f.debug_tuple("Remote").field(&p.object_name()).finish(),
            Returned::Deferred(_) => write!(f, "Deferred"),
        }
    }
}

/// An object callable by a peer.
///
/// # Invariants
/// - `capabilities` must be stable for the lifetime of the object; it is read
///   once when the object is bound or exported.
/// - An `Err` from `invoke` is the callee's own exception and reaches the caller
///   unchanged.
#[async_trait::async_trait]
pub trait RemoteObject: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    async fn invoke(
        &self,
        ctx: &CallContext,
        method: &MethodDescriptor,
        args: Vec<Arg>,
    ) -> Result<Returned, RemoteException>;

    /// Remote `toString`.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_owned()
    }

    /// Remote `hashCode`. Identity based unless overridden.
    fn hash_code(&self) -> i32 {
        (self as *const Self as *const () as usize) as i32
    }

    /// Remote `equals`. Identity based unless overridden.
    fn equals(&self, other: &Arg) -> bool {
        match other {
            Arg::Local(o) => std::ptr::addr_eq(self as *const Self, Arc::as_ptr(o)),
            _ => false,
        }
    }
}

/// Wraps a failure that is not the callee's own exception.
pub fn invocation_error(target: &str, method: &str, cause: RemoteException) -> RemoteException {
    RemoteException::new(
        INVOCATION_ERROR,
        format!(
            "Error while invoking '{}#{}' due to underlying exception: {}",
            target, method, cause.class
        ),
    )
    .with_cause(cause)
}

/// Checks the argument count against the method.
pub fn expect_args(method: &MethodDescriptor, args: &[Arg]) -> Result<(), RemoteException> {
    if args.len() == method.params().len() {
        Ok(())
    } else {
        Err(RemoteException::new(
            ILLEGAL_ARGUMENT,
            format!(
                "{} expects {} arguments, got {}",
                method.signature(),
                method.params().len(),
                args.len()
            ),
        ))
    }
}
