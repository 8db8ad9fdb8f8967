//! # Session Dispatcher
//!
//! One dispatcher per connection. It owns the transport, correlates replies
//! with pending calls, and serves the peer's requests against the shared
//! lookup table and raw channel registry.
//!
//! ## Architecture
//!
//! A pump task reads frames and decodes them. Requests from the peer are
//! served on their own tasks, so a slow invocation never holds up the replies
//! and keepalives behind it. Replies, releases and pushes are handled inline,
//! in arrival order.
//!
//! ## Invariants
//! - Sequence ids are unique per dispatcher and never zero.
//! - Every request is answered with a reply carrying the request's sequence id.
//! - An object handed out as a result or argument stays referenced until the
//!   frame carrying it is sent. A `ReleaseRef` it triggers follows that frame.
//! - An `EndpointRef` result is resolved before the next frame is handled, so
//!   a later `ReleaseRef` cannot remove it first.
//! - Termination happens once. It releases every pending call and deferred
//!   result with the same reason and purges the session's callbacks.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rempack::RemoteException;
use rempack::Value;
use remrpc::Codec;
use remrpc::Message;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::CallError;
use crate::error::Result;
use crate::keepalive;
use crate::keepalive::Watchdog;
use crate::lookup::LookupTable;
use crate::object::Arg;
use crate::object::CallContext;
use crate::object::ENDPOINT_TRANSFER;
use crate::object::LOOKUP_FAILED;
use crate::object::NO_SUCH_METHOD;
use crate::object::PANIC;
use crate::object::Returned;
use crate::object::SERIALIZATION_FAILED;
use crate::object::invocation_error;
use crate::pending::AsyncTable;
use crate::pending::Attached;
use crate::pending::Delivered;
use crate::pending::PendingCalls;
use crate::proxy::RemoteProxy;
use crate::raw;
use crate::raw::RawChannel;
use crate::raw::RawChannelRegistry;
use crate::session::SessionError;
use crate::session::SessionId;
use crate::transport::Transport;

/// Runs once when the session terminates.
pub(crate) type CloseHook = Box<dyn FnOnce(SessionId) + Send + Sync>;

/// State shared by every session of one runtime.
#[derive(Clone)]
pub(crate) struct Services {
    pub codec: Arc<Codec>,
    pub lookup: Arc<LookupTable>,
    pub raw: Arc<RawChannelRegistry>,
    pub config: Config,
}

pub struct Dispatcher {
    session: SessionId,
    transport: Arc<dyn Transport>,
    services: Services,
    pending: PendingCalls,
    asyncs: AsyncTable,
    seq_gen: AtomicU64,
    closed: OnceLock<SessionError>,
    shutdown: watch::Sender<bool>,
    watchdog: Watchdog,
    on_close: Mutex<Option<CloseHook>>,
}

/// Cancels a pending call if the caller stops waiting for it.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.seq);
    }
}

impl Dispatcher {
    /// Creates the dispatcher and spawns its pump and keepalive tasks.
    pub(crate) fn start(
        session: SessionId,
        transport: Arc<dyn Transport>,
        services: Services,
        on_close: Option<CloseHook>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let keepalive = services.config.keepalive;
        let interval = services.config.ping_interval;
        let deadline = services.config.pong_deadline();

        let dispatcher = Arc::new(Self {
            session,
            transport,
            services,
            pending: PendingCalls::default(),
            asyncs: AsyncTable::default(),
            seq_gen: AtomicU64::new(1),
            closed: OnceLock::new(),
            shutdown,
            watchdog: Watchdog::new(),
            on_close: Mutex::new(on_close),
        });

        tokio::spawn(dispatcher.clone().pump());
        if keepalive {
            keepalive::spawn(
                Arc::downgrade(&dispatcher),
                interval,
                deadline,
                dispatcher.shutdown.subscribe(),
            );
        }

        tracing::debug!(%session, keepalive, "session started");
        dispatcher
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    /// Why the session ended, once it has.
    pub fn closed_reason(&self) -> Option<SessionError> {
        self.closed.get().cloned()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Number of deferred results not yet collected.
    pub fn pending_async(&self) -> usize {
        self.asyncs.len()
    }

    pub fn lookup(&self) -> &Arc<LookupTable> {
        &self.services.lookup
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub(crate) fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Resolves an object bound under `name` on the peer.
    pub async fn lookup_name(self: &Arc<Self>, name: &str) -> Result<RemoteProxy> {
        let lookup_name = name.to_owned();
        let reply = self.call(|seq| Message::NameLookup { seq, name: lookup_name }).await?;
        match reply {
            Message::NameLookupReturn { error: Some(e), .. } => Err(CallError::Lookup(e)),
            Message::NameLookupReturn { interfaces, .. } => {
                Ok(RemoteProxy::bound(self.clone(), name.to_owned(), interfaces))
            }
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Resolves the earliest object on the peer that exposes `interface`.
    pub async fn lookup_interface(self: &Arc<Self>, interface: &str) -> Result<RemoteProxy> {
        let canonical = interface.to_owned();
        let reply = self.call(|seq| Message::InterfaceLookup { seq, interface: canonical }).await?;
        match reply {
            Message::InterfaceLookupReturn { error: Some(e), .. } => Err(CallError::Lookup(e)),
            Message::InterfaceLookupReturn { name, interfaces, .. } => {
                Ok(RemoteProxy::bound(self.clone(), name, interfaces))
            }
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Opens the raw channel the peer registered under `token`.
    pub async fn open_raw_channel(self: &Arc<Self>, token: u32) -> Result<RawChannel> {
        let reply = self.call(|seq| Message::OpenRawChannel { seq, token }).await?;
        match reply {
            Message::OpenRawChannelReturn { accepted: true, .. } => Ok(RawChannel::new(self.clone(), token)),
            Message::OpenRawChannelReturn { accepted: false, .. } => {
                Err(CallError::RawChannel(raw::Error::Refused(token)))
            }
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Sends a ping and waits for the next pong. Returns the round trip.
    pub async fn ping(&self) -> Result<Duration> {
        let mut pongs = self.watchdog.subscribe();
        pongs.borrow_and_update();
        let mut shutdown = self.shutdown.subscribe();

        let started = Instant::now();
        self.send(&Message::Ping).await?;

        let wait = async {
            tokio::select! {
                changed = pongs.changed() => changed.is_ok(),
                _ = shutdown.wait_for(|closed| *closed) => false,
            }
        };
        let ponged = match self.services.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| CallError::Timeout)?,
            None => wait.await,
        };

        if ponged {
            Ok(started.elapsed())
        } else {
            Err(CallError::Session(self.closed_reason().unwrap_or(SessionError::Closed)))
        }
    }

    /// Closes the session. Pending calls fail with `SessionError::Closed`.
    pub async fn close(&self) {
        self.terminate(SessionError::Closed).await;
    }

    /// Issues one request and waits for its reply.
    pub(crate) async fn call<F>(&self, build: F) -> Result<Message>
    where
        F: FnOnce(u64) -> Message,
    {
        self.exchange(build).await.map(|delivered| delivered.msg)
    }

    /// Like `call`, but keeps what the pump resolved alongside the reply.
    ///
    /// `build` receives the fresh sequence id. On any failure the pending entry
    /// is removed before returning.
    pub(crate) async fn exchange<F>(&self, build: F) -> Result<Delivered>
    where
        F: FnOnce(u64) -> Message,
    {
        let seq = self.next_seq();
        let rx = self.pending.register(seq);
        let _guard = PendingGuard { pending: &self.pending, seq };

        if let Some(reason) = self.closed_reason() {
            return Err(CallError::Session(reason));
        }

        let msg = build(seq);
        let bytes = self.services.codec.encode(&msg)?;
        tracing::trace!(session = %self.session, seq, kind = ?msg.msg_type(), "request");
        self.send_bytes(&bytes).await?;

        let outcome = match self.services.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                tracing::debug!(session = %self.session, seq, "call timed out");
                CallError::Timeout
            })?,
            None => rx.await,
        };

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(reason)) => Err(CallError::Session(reason)),
            Err(_) => Err(CallError::Session(self.closed_reason().unwrap_or(SessionError::Closed))),
        }
    }

    /// Encodes and sends one message without waiting for a reply.
    pub(crate) async fn send(&self, msg: &Message) -> Result<()> {
        if let Some(reason) = self.closed_reason() {
            return Err(CallError::Session(reason));
        }
        let bytes = self.services.codec.encode(msg)?;
        self.send_bytes(&bytes).await
    }

    async fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.transport.send(bytes).await {
            let reason = SessionError::Transport(e.to_string());
            self.terminate(reason.clone()).await;
            return Err(CallError::Session(self.closed_reason().unwrap_or(reason)));
        }
        Ok(())
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq_gen.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn attach_async(&self, id: u64) -> Attached {
        self.asyncs.attach(id)
    }

    /// Ends the session. Only the first reason is recorded.
    pub async fn terminate(&self, reason: SessionError) {
        if self.closed.set(reason.clone()).is_err() {
            return;
        }
        self.shutdown.send_replace(true);

        match &reason {
            SessionError::Closed => tracing::debug!(session = %self.session, "session closed"),
            _ => tracing::warn!(session = %self.session, %reason, "session failed"),
        }

        self.transport.close().await;
        let calls = self.pending.fail_all(&reason);
        let asyncs = self.asyncs.fail_all(&reason);
        let callbacks = self.services.lookup.purge_session(self.session);
        tracing::debug!(session = %self.session, calls, asyncs, callbacks, "session released");

        let hook = match self.on_close.lock() {
            Ok(mut hook) => hook.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(hook) = hook {
            hook(self.session);
        }
    }

    async fn pump(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let reason = loop {
            let frame = tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => return,
                frame = self.transport.recv() => frame,
            };
            match frame {
                Ok(Some(bytes)) => {
                    let msg = self.services.codec.decode(&bytes);
                    if is_request(&msg) {
                        let this = self.clone();
                        tokio::spawn(async move { this.on_message(msg).await });
                    } else {
                        self.clone().on_message(msg).await;
                    }
                }
                Ok(None) => break SessionError::Closed,
                Err(e) => break SessionError::Transport(e.to_string()),
            }
        };
        self.terminate(reason).await;
    }

    async fn on_message(self: Arc<Self>, msg: Message) {
        if self.is_closed() {
            tracing::trace!(session = %self.session, kind = ?msg.msg_type(), "dropped after close");
            return;
        }

        match msg {
            Message::NameLookup { seq, name } => self.on_name_lookup(seq, &name).await,
            Message::InterfaceLookup { seq, interface } => self.on_interface_lookup(seq, &interface).await,
            Message::Invoke { seq, object, method, args } => self.on_invoke(seq, object, method, args).await,
            Message::ToString { seq, object } => self.on_to_string(seq, &object).await,
            Message::Equals { seq, object, other } => self.on_equals(seq, &object, other).await,
            Message::HashCode { seq, object } => self.on_hash_code(seq, &object).await,
            Message::OpenRawChannel { seq, token } => {
                let accepted = self.services.raw.contains(token);
                self.reply(Message::OpenRawChannelReturn { seq, accepted }).await
            }
            Message::CloseRawChannel { seq, token } => self.on_close_raw(seq, token).await,
            Message::RawChannelData { seq, token, data } => self.on_raw_data(seq, token, &data).await,
            Message::Ping => self.reply(Message::Pong).await,
            Message::Pong => self.watchdog.pong(),
            Message::Error { seq, object, message, cause, decode_error } => {
                self.on_error(seq, object, message, cause, decode_error).await
            }
            Message::ReleaseRef { id } => {
                if let Err(e) = self.services.lookup.release_callback(self.session, &id) {
                    tracing::debug!(session = %self.session, id = %id, error = %e, "release of unknown callback");
                }
            }
            Message::AsyncFinished { id, value, thrown } => {
                let outcome = match thrown {
                    Some(e) => Err(e),
                    None => Ok(value),
                };
                self.asyncs.complete(id, outcome);
            }
            reply @ (Message::NameLookupReturn { .. }
            | Message::InterfaceLookupReturn { .. }
            | Message::InvokeReturn { .. }
            | Message::ToStringReturn { .. }
            | Message::EqualsReturn { .. }
            | Message::HashCodeReturn { .. }
            | Message::OpenRawChannelReturn { .. }
            | Message::CloseRawChannelReturn { .. }
            | Message::RawChannelDataReturn { .. }) => {
                let seq = reply.seq();
                let endpoint = match &reply {
                    Message::InvokeReturn { value: Value::EndpointRef(name), .. } => {
                        self.services.lookup.resolve_target(self.session, name).ok()
                    }
                    _ => None,
                };
                if let Some(unclaimed) = self.pending.fulfill(seq, Delivered { msg: reply, endpoint }) {
                    tracing::debug!(session = %self.session, seq, kind = ?unclaimed.msg.msg_type(), "reply without pending call dropped");
                    if let Message::InvokeReturn { value: Value::AsyncRef(id), .. } = unclaimed.msg {
                        self.asyncs.abandon(id);
                    }
                }
            }
        }
    }

    /// Sends a reply. A reply that cannot be encoded is reported to the peer
    /// and ends the session.
    async fn reply(&self, msg: Message) {
        match self.services.codec.encode(&msg) {
            Ok(bytes) => {
                if let Err(e) = self.send_bytes(&bytes).await {
                    tracing::debug!(session = %self.session, error = %e, "reply not sent");
                }
            }
            Err(e) => self.report_error(msg.seq(), None, e.to_string()).await,
        }
    }

    async fn report_error(&self, seq: u64, object: Option<String>, message: String) {
        let fault = Message::Error {
            seq,
            object,
            message: message.clone(),
            cause: None,
            decode_error: false,
        };
        if let Err(e) = self.send(&fault).await {
            tracing::debug!(session = %self.session, error = %e, "error report not sent");
        }
        self.terminate(SessionError::Protocol(message)).await;
    }

    async fn on_name_lookup(&self, seq: u64, name: &str) {
        let reply = match self.services.lookup.resolve_by_name(name) {
            Ok(c) => Message::NameLookupReturn { seq, interfaces: c.interface_names(), error: None },
            Err(e) => Message::NameLookupReturn { seq, interfaces: Vec::new(), error: Some(e.to_string()) },
        };
        self.reply(reply).await
    }

    async fn on_interface_lookup(&self, seq: u64, interface: &str) {
        let reply = match self.services.lookup.resolve_by_interface(interface) {
            Ok(c) => Message::InterfaceLookupReturn {
                seq,
                name: c.name().to_owned(),
                interfaces: c.interface_names(),
                error: None,
            },
            Err(e) => Message::InterfaceLookupReturn {
                seq,
                name: String::new(),
                interfaces: Vec::new(),
                error: Some(e.to_string()),
            },
        };
        self.reply(reply).await
    }

    async fn on_invoke(self: &Arc<Self>, seq: u64, object: String, method: u64, args: Vec<Value>) {
        let mut held = Vec::new();
        let value = match self.invoke_local(&object, method, args, &mut held).await {
            Ok(value) => value,
            Err(thrown) => Value::Exception(thrown),
        };

        match self.services.codec.encode(&Message::InvokeReturn { seq, value }) {
            Ok(bytes) => {
                if let Err(e) = self.send_bytes(&bytes).await {
                    tracing::debug!(session = %self.session, seq, error = %e, "invoke reply not sent");
                }
            }
            Err(e) => {
                tracing::warn!(session = %self.session, seq, object = %object, error = %e, "result not encodable");
                let cause = RemoteException::new(SERIALIZATION_FAILED, e.to_string());
                let value = Value::Exception(invocation_error(&object, &format!("{:#018x}", method), cause));
                self.reply(Message::InvokeReturn { seq, value }).await
            }
        }
        drop(held);
    }

    /// Runs one invocation against a local object.
    ///
    /// An `Err` from the callee passes through unchanged. Every other failure
    /// is wrapped as an invocation error naming the target and method.
    /// A proxy the result refers to is moved into `held`.
    async fn invoke_local(
        self: &Arc<Self>,
        object: &str,
        hash: u64,
        args: Vec<Value>,
        held: &mut Vec<RemoteProxy>,
    ) -> std::result::Result<Value, RemoteException> {
        let lookup = &self.services.lookup;
        let container = lookup
            .resolve_target(self.session, object)
            .map_err(|e| invocation_error(object, &format!("{:#018x}", hash), RemoteException::new(LOOKUP_FAILED, e.to_string())))?;

        let Some(method) = container.method(hash).cloned() else {
            let cause = RemoteException::new(
                NO_SUCH_METHOD,
                format!("'{}' has no method with signature hash {:#018x}", object, hash),
            );
            return Err(invocation_error(object, &format!("{:#018x}", hash), cause));
        };

        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            resolved.push(self.import_arg(arg).map_err(|e| invocation_error(object, method.name(), e))?);
        }

        tracing::trace!(session = %self.session, object, method = %method.signature(), "invoke");
        let ctx = CallContext::new(self.session, object);
        let call = container.object().invoke(&ctx, &method, resolved);
        let returned = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(returned)) => returned,
            Ok(Err(thrown)) => return Err(thrown),
            Err(panic) => {
                tracing::warn!(session = %self.session, object, method = %method.signature(), "callee panicked");
                let cause = RemoteException::new(PANIC, panic_message(&*panic));
                return Err(invocation_error(object, method.name(), cause));
            }
        };

        self.export_result(object, method.name(), method.is_void(), returned, held)
    }

    /// Turns a received placeholder back into something the callee can use.
    fn import_arg(self: &Arc<Self>, value: Value) -> std::result::Result<Arg, RemoteException> {
        match value {
            Value::EndpointRef(name) => {
                let container = self
                    .services
                    .lookup
                    .resolve_target(self.session, &name)
                    .map_err(|e| RemoteException::new(LOOKUP_FAILED, e.to_string()))?;
                Ok(Arg::Local(container.object().clone()))
            }
            Value::Callback { id, interfaces } => Ok(Arg::Remote(RemoteProxy::callback(self.clone(), id, interfaces))),
            other => Ok(Arg::Value(other)),
        }
    }

    /// Rewrites a callee's result into its wire shape.
    fn export_result(
        self: &Arc<Self>,
        object: &str,
        method: &str,
        void: bool,
        returned: Returned,
        held: &mut Vec<RemoteProxy>,
    ) -> std::result::Result<Value, RemoteException> {
        match returned {
            Returned::Void => Ok(Value::Void),
            Returned::Value(_) if void => Ok(Value::Void),
            Returned::Value(value) => Ok(value),
            Returned::Remote(proxy) if proxy.session() == self.session => {
                let name = proxy.object_name().to_owned();
                held.push(proxy);
                Ok(Value::EndpointRef(name))
            }
            Returned::Remote(proxy) => {
                let cause = RemoteException::new(
                    ENDPOINT_TRANSFER,
                    format!("'{}' belongs to {}, not {}", proxy.object_name(), proxy.session(), self.session),
                );
                Err(invocation_error(object, method, cause))
            }
            Returned::Local(local) => {
                let lookup = &self.services.lookup;
                if lookup.is_bound(&local) {
                    let cause = RemoteException::new(
                        ENDPOINT_TRANSFER,
                        "result is a registered remote object. Endpoints can not be transferred",
                    );
                    return Err(invocation_error(object, method, cause));
                }
                let (id, interfaces) = lookup
                    .register_callback(self.session, local)
                    .map_err(|e| invocation_error(object, method, RemoteException::new(LOOKUP_FAILED, e.to_string())))?;
                Ok(Value::Callback { id, interfaces })
            }
            Returned::Deferred(future) => {
                let id = self.next_seq();
                tokio::spawn(self.clone().publish_async(id, future));
                Ok(Value::AsyncRef(id))
            }
        }
    }

    /// Awaits a deferred result and pushes its completion to the peer once.
    async fn publish_async(
        self: Arc<Self>,
        id: u64,
        future: BoxFuture<'static, std::result::Result<Value, RemoteException>>,
    ) {
        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(RemoteException::new(PANIC, panic_message(&*panic))),
        };
        let msg = match outcome {
            Ok(value) => Message::AsyncFinished { id, value, thrown: None },
            Err(thrown) => Message::AsyncFinished { id, value: Value::Null, thrown: Some(thrown) },
        };
        if let Err(e) = self.send(&msg).await {
            tracing::warn!(session = %self.session, id, error = %e, "async completion not delivered");
        }
    }

    async fn on_to_string(&self, seq: u64, object: &str) {
        let reply = match self.services.lookup.resolve_target(self.session, object) {
            Ok(c) => match guard(|| c.object().describe()) {
                Ok(value) => Message::ToStringReturn { seq, value, error: None },
                Err(e) => Message::ToStringReturn { seq, value: String::new(), error: Some(e) },
            },
            Err(e) => Message::ToStringReturn { seq, value: String::new(), error: Some(e.to_string()) },
        };
        self.reply(reply).await
    }

    async fn on_equals(self: &Arc<Self>, seq: u64, object: &str, other: Value) {
        let container = match self.services.lookup.resolve_target(self.session, object) {
            Ok(c) => c,
            Err(e) => return self.reply(Message::EqualsReturn { seq, value: false, error: Some(e.to_string()) }).await,
        };
        if other.is_null() {
            return self.reply(Message::EqualsReturn { seq, value: false, error: None }).await;
        }
        let reply = match self.import_arg(other) {
            Ok(arg) => match guard(|| container.object().equals(&arg)) {
                Ok(value) => Message::EqualsReturn { seq, value, error: None },
                Err(e) => Message::EqualsReturn { seq, value: false, error: Some(e) },
            },
            Err(e) => Message::EqualsReturn { seq, value: false, error: Some(e.to_string()) },
        };
        self.reply(reply).await
    }

    async fn on_hash_code(&self, seq: u64, object: &str) {
        let reply = match self.services.lookup.resolve_target(self.session, object) {
            Ok(c) => match guard(|| c.object().hash_code()) {
                Ok(value) => Message::HashCodeReturn { seq, value, error: None },
                Err(e) => Message::HashCodeReturn { seq, value: -1, error: Some(e) },
            },
            Err(e) => Message::HashCodeReturn { seq, value: -1, error: Some(e.to_string()) },
        };
        self.reply(reply).await
    }

    async fn on_close_raw(&self, seq: u64, token: u32) {
        let reply = match self.services.raw.close(token) {
            Ok(()) => Message::CloseRawChannelReturn { seq, closed: true, error: None },
            Err(e) => {
                tracing::debug!(session = %self.session, token, error = %e, "raw channel close failed");
                Message::CloseRawChannelReturn { seq, closed: false, error: Some(e.to_string()) }
            }
        };
        self.reply(reply).await
    }

    async fn on_raw_data(&self, seq: u64, token: u32, data: &[u8]) {
        let error = match self.services.raw.write(token, data) {
            Ok(()) => None,
            Err(e @ raw::Error::NoListener(_)) => {
                tracing::debug!(session = %self.session, token, len = data.len(), "raw data without listener dropped");
                Some(e.to_string())
            }
            Err(e) => {
                tracing::warn!(session = %self.session, token, error = %e, "raw channel listener failed");
                Some(e.to_string())
            }
        };
        self.reply(Message::RawChannelDataReturn { seq, error }).await
    }

    /// Local decode faults and faults reported by the peer both end the session.
    async fn on_error(
        &self,
        seq: u64,
        object: Option<String>,
        message: String,
        cause: Option<RemoteException>,
        decode_error: bool,
    ) {
        let target = object.map(|o| format!(" for '{}'", o)).unwrap_or_default();
        let reason = if decode_error {
            SessionError::Decode(format!("message {}{} could not be read: {}", seq, target, message))
        } else {
            SessionError::Protocol(format!("peer failed writing message {}{}: {}", seq, target, message))
        };
        if let Some(cause) = &cause {
            tracing::warn!(session = %self.session, seq, cause = %cause, "peer reported a fault");
        }
        self.terminate(reason).await;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("session", &self.session)
            .field("closed", &self.closed.get())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Messages served on their own task. Everything else is handled by the pump.
fn is_request(msg: &Message) -> bool {
    matches!(
        msg,
        Message::NameLookup { .. }
            | Message::InterfaceLookup { .. }
            | Message::Invoke { .. }
            | Message::ToString { .. }
            | Message::Equals { .. }
            | Message::HashCode { .. }
            | Message::OpenRawChannel { .. }
            | Message::CloseRawChannel { .. }
            | Message::RawChannelData { .. }
            | Message::Ping
    )
}

/// Runs user code that must not take the dispatcher down with it.
fn guard<T>(f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_message(&*panic))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callee panicked".to_owned()
    }
}
