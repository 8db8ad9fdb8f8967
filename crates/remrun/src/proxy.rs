//! # Remote Proxies
//!
//! A `RemoteProxy` stands for an object that lives on the peer: either one it
//! bound by name, or a callback it exported to us. Calls go out through the
//! owning dispatcher and their results are interpreted back into `Reply`.
//!
//! ## Invariants
//! - A callback proxy releases its reference on the peer exactly once, either
//!   through `release` or when the last clone is dropped.
//! - A released proxy refuses further calls locally.
//! - A proxy passed as an argument stays alive until the call completes, so
//!   its release never overtakes the request naming it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use rempack::RemoteException;
use rempack::Value;
use remrpc::Message;

use crate::dispatcher::Dispatcher;
use crate::error::CallError;
use crate::error::Result;
use crate::interface::MethodDescriptor;
use crate::lookup::Container;
use crate::object::Arg;
use crate::object::ENDPOINT_TRANSFER;
use crate::object::RemoteObject;
use crate::pending::Attached;
use crate::session::SessionError;
use crate::session::SessionId;

#[derive(Clone)]
pub struct RemoteProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    dispatcher: Arc<Dispatcher>,
    object: String,
    interfaces: Vec<String>,
    callback: bool,
    released: AtomicBool,
}

impl RemoteProxy {
    pub(crate) fn bound(dispatcher: Arc<Dispatcher>, object: String, interfaces: Vec<String>) -> Self {
        Self::new(dispatcher, object, interfaces, false)
    }

    pub(crate) fn callback(dispatcher: Arc<Dispatcher>, id: String, interfaces: Vec<String>) -> Self {
        Self::new(dispatcher, id, interfaces, true)
    }

    fn new(dispatcher: Arc<Dispatcher>, object: String, interfaces: Vec<String>, callback: bool) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                dispatcher,
                object,
                interfaces,
                callback,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Bound name, or callback id.
    pub fn object_name(&self) -> &str {
        &self.inner.object
    }

    /// Canonical names of every interface the target exposes.
    pub fn interfaces(&self) -> &[String] {
        &self.inner.interfaces
    }

    pub fn implements(&self, canonical: &str) -> bool {
        self.inner.interfaces.iter().any(|i| i == canonical)
    }

    pub fn session(&self) -> SessionId {
        self.inner.dispatcher.session()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn is_callback(&self) -> bool {
        self.inner.callback
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Invokes `method` on the remote object.
    pub async fn invoke(&self, method: &MethodDescriptor, args: Vec<Arg>) -> Result<Reply> {
        self.check_live()?;
        let mut held = Vec::new();
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.export_arg(method.signature(), arg, &mut held)?);
        }

        let object = self.inner.object.clone();
        let hash = method.hash();
        let reply = self
            .inner
            .dispatcher
            .exchange(|seq| Message::Invoke { seq, object, method: hash, args: values })
            .await;
        drop(held);

        let reply = reply?;
        match reply.msg {
            Message::InvokeReturn { value, .. } => self.interpret(method, value, reply.endpoint),
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Remote `toString`.
    pub async fn describe(&self) -> Result<String> {
        self.check_live()?;
        let object = self.inner.object.clone();
        match self.inner.dispatcher.call(|seq| Message::ToString { seq, object }).await? {
            Message::ToStringReturn { error: Some(e), .. } => Err(CallError::Lookup(e)),
            Message::ToStringReturn { value, .. } => Ok(value),
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Remote `equals`. The peer answers false for a `Null` value.
    pub async fn equals(&self, other: Arg) -> Result<bool> {
        self.check_live()?;
        let mut held = Vec::new();
        let other = self.export_arg("equals(Object)", other, &mut held)?;
        let object = self.inner.object.clone();
        let reply = self.inner.dispatcher.call(|seq| Message::Equals { seq, object, other }).await;
        drop(held);
        match reply? {
            Message::EqualsReturn { error: Some(e), .. } => Err(CallError::Lookup(e)),
            Message::EqualsReturn { value, .. } => Ok(value),
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Remote `hashCode`.
    pub async fn hash_code(&self) -> Result<i32> {
        self.check_live()?;
        let object = self.inner.object.clone();
        match self.inner.dispatcher.call(|seq| Message::HashCode { seq, object }).await? {
            Message::HashCodeReturn { error: Some(e), .. } => Err(CallError::Lookup(e)),
            Message::HashCodeReturn { value, .. } => Ok(value),
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Gives up this proxy. For a callback the peer drops one reference.
    ///
    /// Releasing twice is a no-op. Calls through any clone fail afterwards.
    pub async fn release(&self) -> Result<()> {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.inner.callback {
            let id = self.inner.object.clone();
            self.inner.dispatcher.send(&Message::ReleaseRef { id }).await?;
        }
        Ok(())
    }

    fn check_live(&self) -> Result<()> {
        if self.is_released() {
            return Err(CallError::Released(self.inner.object.clone()));
        }
        if let Some(reason) = self.inner.dispatcher.closed_reason() {
            return Err(CallError::Session(reason));
        }
        Ok(())
    }

    /// Replaces object arguments with their wire placeholders. A proxy sent
    /// back to its owner is moved into `held`.
    fn export_arg(&self, signature: &str, arg: Arg, held: &mut Vec<RemoteProxy>) -> Result<Value> {
        let dispatcher = &self.inner.dispatcher;
        match arg {
            Arg::Value(value) => Ok(value),
            Arg::Local(object) => {
                let (id, interfaces) = dispatcher
                    .lookup()
                    .register_callback(dispatcher.session(), object)
                    .map_err(|e| CallError::Lookup(e.to_string()))?;
                Ok(Value::Callback { id, interfaces })
            }
            Arg::Remote(proxy) if proxy.session() == dispatcher.session() => {
                let name = proxy.object_name().to_owned();
                held.push(proxy);
                Ok(Value::EndpointRef(name))
            }
            Arg::Remote(proxy) => Err(CallError::Invocation {
                signature: signature.to_owned(),
                cause: RemoteException::new(
                    ENDPOINT_TRANSFER,
                    format!("'{}' belongs to {}", proxy.object_name(), proxy.session()),
                ),
            }),
        }
    }

    /// `endpoint` is the local object the pump resolved for an `EndpointRef`.
    fn interpret(&self, method: &MethodDescriptor, value: Value, endpoint: Option<Arc<Container>>) -> Result<Reply> {
        let dispatcher = &self.inner.dispatcher;
        match value {
            Value::Void => Ok(Reply::Void),
            Value::Exception(thrown) => Err(classify(method, thrown)),
            Value::Callback { id, interfaces } => {
                Ok(Reply::Proxy(RemoteProxy::callback(dispatcher.clone(), id, interfaces)))
            }
            Value::EndpointRef(name) => match endpoint {
                Some(container) => Ok(Reply::Local(container.object().clone())),
                None => Err(CallError::Lookup(format!("no local object '{}'", name))),
            },
            Value::AsyncRef(id) => {
                let state = dispatcher.attach_async(id);
                Ok(Reply::Async(AsyncResult { id, method: method.clone(), state }))
            }
            other => Ok(Reply::Value(other)),
        }
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("object", &self.inner.object)
            .field("session", &self.session())
            .field("callback", &self.inner.callback)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if !self.callback || self.released.swap(true, Ordering::AcqRel) || self.dispatcher.is_closed() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(id = %self.object, "callback proxy dropped outside a runtime");
            return;
        };
        let dispatcher = self.dispatcher.clone();
        let id = std::mem::take(&mut self.object);
        handle.spawn(async move {
            if let Err(e) = dispatcher.send(&Message::ReleaseRef { id }).await {
                tracing::debug!(session = %dispatcher.session(), error = %e, "release not sent");
            }
        });
    }
}

/// An undeclared exception is wrapped; a declared one is surfaced as is.
fn classify(method: &MethodDescriptor, thrown: RemoteException) -> CallError {
    if method.declares(&thrown.class) {
        CallError::Remote(thrown)
    } else {
        CallError::Invocation { signature: method.signature().to_owned(), cause: thrown }
    }
}

/// The interpreted result of a remote invocation.
pub enum Reply {
    /// The method returned nothing.
    Void,
    Value(Value),
    /// The peer exported a callback object.
    Proxy(RemoteProxy),
    /// The peer returned a reference to one of our own objects.
    Local(Arc<dyn RemoteObject>),
    /// The result arrives later.
    Async(AsyncResult),
}

impl Reply {
    /// The plain value, if that is what came back. `Void` maps to `Value::Void`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Reply::Void => Some(Value::Void),
            Reply::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Option<RemoteProxy> {
        match self {
            Reply::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_local(self) -> Option<Arc<dyn RemoteObject>> {
        match self {
            Reply::Local(o) => Some(o),
            _ => None,
        }
    }

    pub fn into_async(self) -> Option<AsyncResult> {
        match self {
            Reply::Async(a) => Some(a),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Void => write!(f, "Void"),
            Reply::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Reply::Proxy(p) => f.debug_tuple("Proxy").field(p).finish(),
            Reply::Local(o) => f.debug_tuple("Local").field(&o.describe()).finish(),
            Reply::Async(a) => f.debug_tuple("Async").field(&a.id).finish(),
        }
    }
}

/// Handle to a result the peer completes later.
pub struct AsyncResult {
    id: u64,
    method: MethodDescriptor,
    state: Attached,
}

impl AsyncResult {
    /// The outstanding id assigned by the peer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for completion. Fails if the session ends first.
    pub async fn wait(self) -> Result<Value> {
        let outcome = match self.state {
            Attached::Ready(outcome) => outcome,
            Attached::Waiting(rx) => match rx.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(reason)) => return Err(CallError::Session(reason)),
                Err(_) => return Err(CallError::Session(SessionError::Closed)),
            },
        };
        outcome.map_err(|thrown| classify(&self.method, thrown))
    }
}

impl std::fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("id", &self.id)
            .field("method", &self.method.signature())
            .finish()
    }
}
