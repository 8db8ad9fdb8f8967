use std::sync::Arc;
use std::time::Duration;

use rempack::RemoteException;
use rempack::Value;
use remrpc::Message;

use crate::CallError;
use crate::Runtime;
use crate::config::Config;
use crate::interface::Capabilities;
use crate::interface::Interface;
use crate::interface::MethodDescriptor;
use crate::interface::signature_hash;
use crate::lookup;
use crate::lookup::LookupTable;
use crate::object;
use crate::object::Arg;
use crate::object::CallContext;
use crate::object::RemoteObject;
use crate::object::Returned;
use crate::pending::AsyncTable;
use crate::pending::Attached;
use crate::pending::MAX_PARKED;
use crate::pending::PendingCalls;
use crate::proxy::RemoteProxy;
use crate::session::SessionError;
use crate::session::SessionId;
use crate::transport::mem::DuplexTransport;

fn greeter() -> Arc<Interface> {
    Interface::new("test.Greeter")
        .method(MethodDescriptor::new("greet", &["String"], "String"))
        .build()
}

fn loud_greeter() -> Arc<Interface> {
    Interface::new("test.LoudGreeter")
        .extends(greeter())
        .method(MethodDescriptor::new("shout", &["String"], "String"))
        .build()
}

struct Greeter(Capabilities);

impl Greeter {
    fn plain() -> Arc<Self> {
        Arc::new(Self(Capabilities::new().implements(greeter())))
    }

    fn with(caps: Capabilities) -> Arc<Self> {
        Arc::new(Self(caps))
    }
}

#[async_trait::async_trait]
impl RemoteObject for Greeter {
    fn capabilities(&self) -> Capabilities {
        self.0.clone()
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        method: &MethodDescriptor,
        args: Vec<Arg>,
    ) -> Result<Returned, RemoteException> {
        object::expect_args(method, &args)?;
        let who = args[0].value().and_then(Value::as_str).unwrap_or("nobody");
        Ok(Value::from(format!("hello {}", who)).into())
    }
}

fn names(ifaces: &[Arc<Interface>]) -> Vec<&str> {
    ifaces.iter().map(|i| i.name()).collect()
}

// ============================================================================
// SIGNATURES
// ============================================================================

#[test]
fn test_signature_format_and_hash() {
    let m = MethodDescriptor::new("add", &["int", "int"], "int");
    assert_eq!(m.signature(), "int add(int,int)");
    assert_eq!(m.hash(), signature_hash("int add(int,int)"));
    assert_eq!(signature_hash("int add(int,int)"), signature_hash("int add(int,int)"));
}

#[test]
fn test_overloads_hash_apart() {
    let a = MethodDescriptor::new("add", &["int", "int"], "int");
    let b = MethodDescriptor::new("add", &["long", "long"], "long");
    let c = MethodDescriptor::new("add", &[], "void");
    assert_ne!(a.hash(), b.hash());
    assert_ne!(a.hash(), c.hash());
    assert!(c.is_void());
}

#[test]
fn test_declared_exceptions() {
    let m = MethodDescriptor::new("open", &["String"], "void").throws(&["io.NotFound"]);
    assert!(m.declares("io.NotFound"));
    assert!(!m.declares("io.Denied"));
}

#[test]
fn test_find_through_parents() {
    let iface = loud_greeter();
    assert_eq!(iface.find_by_name("greet").map(|m| m.signature()), Some("String greet(String)"));
    assert_eq!(iface.find_by_name("shout").map(|m| m.signature()), Some("String shout(String)"));
    assert!(iface.find_by_name("missing").is_none());
}

// ============================================================================
// CAPABILITIES
// ============================================================================

#[test]
fn test_implemented_expands_parents_once() {
    let caps = Capabilities::new().implements(loud_greeter()).implements(greeter());
    assert_eq!(names(&caps.resolve()), vec!["test.LoudGreeter", "test.Greeter"]);
}

#[test]
fn test_explicit_overrides_implemented() {
    let caps = Capabilities::new().implements(loud_greeter()).explicit(greeter());
    assert_eq!(names(&caps.resolve()), vec!["test.Greeter"]);
}

#[test]
fn test_inherited_surface_follows_own() {
    let extra = Interface::new("test.Extra").build();
    let base = Capabilities::new().implements(greeter()).implements(extra);
    let caps = Capabilities::new().implements(loud_greeter()).inherit(base);
    assert_eq!(names(&caps.resolve()), vec!["test.LoudGreeter", "test.Greeter", "test.Extra"]);
}

// ============================================================================
// LOOKUP TABLE
// ============================================================================

#[test]
fn test_bind_twice_keeps_first() {
    let table = LookupTable::new();
    let first = Greeter::plain();
    table.bind("greeter", first.clone()).expect("bind");

    let err = table.bind("greeter", Greeter::plain()).unwrap_err();
    match err {
        lookup::Error::AlreadyBound(name) => assert_eq!(name, "greeter"),
        _ => panic!("Expected AlreadyBound, got {:?}", err),
    }
    let resolved = table.resolve_by_name("greeter").expect("resolve");
    let first: Arc<dyn RemoteObject> = first;
    assert!(Arc::ptr_eq(resolved.object(), &first));
}

#[test]
fn test_unbind_missing() {
    let table = LookupTable::new();
    match table.unbind("ghost").unwrap_err() {
        lookup::Error::NotBound(name) => assert_eq!(name, "ghost"),
        err => panic!("Expected NotBound, got {:?}", err),
    }
}

#[test]
fn test_object_without_interfaces_is_rejected() {
    let table = LookupTable::new();
    let err = table.bind("mute", Greeter::with(Capabilities::new())).unwrap_err();
    match err {
        lookup::Error::NoRemoteInterfaces(_) => {}
        _ => panic!("Expected NoRemoteInterfaces, got {:?}", err),
    }
    assert!(table.bound_names().is_empty());
}

#[test]
fn test_interface_lookup_picks_earliest_binding() {
    let table = LookupTable::new();
    table.bind("second", Greeter::with(Capabilities::new().implements(loud_greeter()))).expect("bind");
    table.bind("third", Greeter::plain()).expect("bind");

    assert_eq!(table.resolve_by_interface("test.Greeter").expect("resolve").name(), "second");
    assert_eq!(table.resolve_by_interface("test.LoudGreeter").expect("resolve").name(), "second");
    assert!(table.resolve_by_interface("test.Unknown").is_err());
    assert_eq!(table.bound_names(), vec!["second".to_owned(), "third".to_owned()]);

    table.unbind("second").expect("unbind");
    assert_eq!(table.resolve_by_interface("test.Greeter").expect("resolve").name(), "third");
}

#[test]
fn test_container_method_table_includes_parents() {
    let table = LookupTable::new();
    table.bind("loud", Greeter::with(Capabilities::new().implements(loud_greeter()))).expect("bind");
    let container = table.resolve_by_name("loud").expect("resolve");
    let greet = MethodDescriptor::new("greet", &["String"], "String");
    assert!(container.method(greet.hash()).is_some());
    assert!(container.implements("test.Greeter"));
}

#[test]
fn test_callback_reference_counting() {
    let table = LookupTable::new();
    let session = SessionId(1);
    let object: Arc<dyn RemoteObject> = Greeter::plain();

    let (id, interfaces) = table.register_callback(session, object.clone()).expect("export");
    assert_eq!(interfaces, vec!["test.Greeter".to_owned()]);
    let (again, _) = table.register_callback(session, object.clone()).expect("export");
    assert_eq!(id, again);
    assert_eq!(table.callback_count(session), 1);

    assert!(table.resolve_target(session, &id).is_ok());
    assert!(table.resolve_target(SessionId(2), &id).is_err());
    assert!(table.release_callback(SessionId(2), &id).is_err());

    assert!(!table.release_callback(session, &id).expect("release"));
    assert!(table.release_callback(session, &id).expect("release"));
    assert!(table.resolve_callback(session, &id).is_err());
    assert!(table.release_callback(session, &id).is_err());
}

#[test]
fn test_reexport_after_release_gets_fresh_id() {
    let table = LookupTable::new();
    let session = SessionId(1);
    let object: Arc<dyn RemoteObject> = Greeter::plain();

    let (first, _) = table.register_callback(session, object.clone()).expect("export");
    assert!(table.release_callback(session, &first).expect("release"));

    let (second, _) = table.register_callback(session, object.clone()).expect("export");
    assert_ne!(first, second);
    assert!(table.resolve_target(session, &first).is_err());
    assert!(table.resolve_target(session, &second).is_ok());

    // Another session exporting the same instance gets its own id.
    let (other, _) = table.register_callback(SessionId(2), object).expect("export");
    assert_ne!(other, second);
    assert_eq!(table.callback_count(session), 1);
    assert_eq!(table.callback_count(SessionId(2)), 1);
}

#[test]
fn test_purge_session_drops_only_its_callbacks() {
    let table = LookupTable::new();
    table.register_callback(SessionId(1), Greeter::plain()).expect("export");
    table.register_callback(SessionId(1), Greeter::plain()).expect("export");
    table.register_callback(SessionId(2), Greeter::plain()).expect("export");

    assert_eq!(table.purge_session(SessionId(1)), 2);
    assert_eq!(table.callback_count(SessionId(1)), 0);
    assert_eq!(table.callback_count(SessionId(2)), 1);
}

#[test]
fn test_is_bound_by_identity() {
    let table = LookupTable::new();
    let bound: Arc<dyn RemoteObject> = Greeter::plain();
    let other: Arc<dyn RemoteObject> = Greeter::plain();
    table.bind("greeter", bound.clone()).expect("bind");
    assert!(table.is_bound(&bound));
    assert!(!table.is_bound(&other));
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn test_config_builders() {
    let config = Config::default()
        .with_ping_interval(Duration::from_secs(5))
        .with_max_missed_pongs(0)
        .with_call_timeout(Duration::from_secs(1))
        .with_max_frame_len(1024)
        .without_keepalive();
    assert_eq!(config.max_missed_pongs, 1);
    assert_eq!(config.pong_deadline(), Duration::from_secs(5));
    assert_eq!(config.call_timeout, Some(Duration::from_secs(1)));
    assert_eq!(config.max_frame_len, 1024);
    assert!(!config.keepalive);

    let zero = Config::default().with_ping_interval(Duration::ZERO);
    assert_eq!(zero.ping_interval, crate::config::MIN_PING_INTERVAL);
    assert!(zero.pong_deadline() > Duration::ZERO);

    let defaults = Config::default();
    assert_eq!(defaults.pong_deadline(), Duration::from_secs(60));
    assert!(defaults.call_timeout.is_none());
    assert!(defaults.keepalive);
}

// ============================================================================
// PENDING CALLS
// ============================================================================

#[tokio::test]
async fn test_pending_fulfilled_once() {
    let pending = PendingCalls::default();
    let rx = pending.register(7);
    assert_eq!(pending.len(), 1);

    assert!(pending.fulfill(7, Message::Pong.into()).is_none());
    match pending.fulfill(7, Message::Pong.into()) {
        Some(unclaimed) => assert_eq!(unclaimed.msg, Message::Pong),
        None => panic!("Expected the second reply back"),
    }
    assert_eq!(pending.fail_all(&SessionError::Closed), 0);

    match rx.await {
        Ok(Ok(delivered)) => assert_eq!(delivered.msg, Message::Pong),
        other => panic!("Expected Pong, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reply_after_cancel_is_handed_back() {
    let pending = PendingCalls::default();
    let rx = pending.register(8);
    drop(rx);

    let reply = Message::InvokeReturn { seq: 8, value: Value::AsyncRef(2) };
    match pending.fulfill(8, reply.clone().into()) {
        Some(unclaimed) => assert_eq!(unclaimed.msg, reply),
        None => panic!("Expected the reply back"),
    }
    assert_eq!(pending.len(), 0);
}

#[tokio::test]
async fn test_pending_cancel_and_fail_all() {
    let pending = PendingCalls::default();
    let cancelled = pending.register(1);
    let failed = pending.register(2);

    assert!(pending.cancel(1));
    assert!(!pending.cancel(1));
    assert!(cancelled.await.is_err());

    assert_eq!(pending.fail_all(&SessionError::LinkFailure), 1);
    match failed.await {
        Ok(Err(SessionError::LinkFailure)) => {}
        other => panic!("Expected LinkFailure, got {:?}", other),
    }
    assert_eq!(pending.len(), 0);
}

// ============================================================================
// ASYNC TABLE
// ============================================================================

#[tokio::test]
async fn test_async_finished_before_attach() {
    let table = AsyncTable::default();
    table.complete(3, Ok(Value::I32(9)));
    assert_eq!(table.len(), 1);

    match table.attach(3) {
        Attached::Ready(Ok(Value::I32(9))) => {}
        Attached::Ready(other) => panic!("Expected I32(9), got {:?}", other),
        Attached::Waiting(_) => panic!("Expected Ready, got Waiting"),
    }
    assert_eq!(table.len(), 0);
}

#[tokio::test]
async fn test_async_attach_then_finish() {
    let table = AsyncTable::default();
    let Attached::Waiting(rx) = table.attach(4) else {
        panic!("Expected Waiting");
    };
    table.complete(4, Err(RemoteException::new("test.Boom", "late")));
    table.complete(4, Ok(Value::Null));

    match rx.await {
        Ok(Ok(Err(thrown))) => assert_eq!(thrown.class, "test.Boom"),
        other => panic!("Expected thrown exception, got {:?}", other),
    }
}

#[test]
fn test_abandon_before_finish() {
    let table = AsyncTable::default();
    table.abandon(6);
    assert_eq!(table.len(), 1);
    table.complete(6, Ok(Value::I32(1)));
    assert_eq!(table.len(), 0);
}

#[test]
fn test_abandon_after_finish() {
    let table = AsyncTable::default();
    table.complete(6, Ok(Value::I32(1)));
    table.abandon(6);
    assert_eq!(table.len(), 0);
}

#[test]
fn test_parked_outcomes_are_bounded() {
    let table = AsyncTable::default();
    for id in 0..MAX_PARKED as u64 {
        table.complete(id, Ok(Value::Null));
    }
    table.complete(u64::MAX, Ok(Value::Null));
    table.abandon(u64::MAX - 1);
    assert_eq!(table.len(), MAX_PARKED);

    // A waiter already attached still receives its outcome.
    table.complete(0, Ok(Value::Null));
    match table.attach(0) {
        Attached::Ready(Ok(Value::Null)) => {}
        Attached::Ready(other) => panic!("Expected Null, got {:?}", other),
        Attached::Waiting(_) => panic!("Expected Ready, got Waiting"),
    }
    assert_eq!(table.len(), MAX_PARKED - 1);
}

#[tokio::test]
async fn test_async_fail_all_releases_waiters() {
    let table = AsyncTable::default();
    let Attached::Waiting(rx) = table.attach(5) else {
        panic!("Expected Waiting");
    };
    assert_eq!(table.fail_all(&SessionError::Closed), 1);
    match rx.await {
        Ok(Err(SessionError::Closed)) => {}
        other => panic!("Expected Closed, got {:?}", other),
    }
    assert_eq!(table.len(), 0);
}

// ============================================================================
// DISPATCH
// ============================================================================

fn wired() -> (Runtime, Runtime, Arc<crate::Dispatcher>) {
    let config = Config::default().without_keepalive();
    let server = Runtime::new(config.clone());
    let client = Runtime::new(config);
    server.bind("greeter", Greeter::plain()).expect("bind");
    let (a, b) = DuplexTransport::pair();
    server.attach(a);
    let client_side = client.attach(b);
    (server, client, client_side)
}

#[tokio::test]
async fn test_invoke_unknown_callback_fails_lookup() {
    let (_server, _client, client_side) = wired();
    let ghost = RemoteProxy::callback(client_side.clone(), "cb-ghost".to_owned(), vec!["test.Greeter".to_owned()]);

    let greet = MethodDescriptor::new("greet", &["String"], "String");
    let err = ghost.invoke(&greet, vec![Value::from("x").into()]).await.unwrap_err();
    match err {
        CallError::Invocation { cause, .. } => {
            assert_eq!(cause.class, object::INVOCATION_ERROR);
            assert_eq!(cause.root_cause().class, object::LOOKUP_FAILED);
        }
        _ => panic!("Expected Invocation, got {:?}", err),
    }
    assert!(!client_side.is_closed());
}

#[tokio::test]
async fn test_wrong_arity_is_illegal_argument() {
    let (_server, _client, client_side) = wired();
    let greeter = client_side.lookup_name("greeter").await.expect("lookup");

    let greet = MethodDescriptor::new("greet", &["String"], "String");
    let err = greeter.invoke(&greet, vec![]).await.unwrap_err();
    match err {
        CallError::Invocation { cause, .. } => assert_eq!(cause.class, object::ILLEGAL_ARGUMENT),
        _ => panic!("Expected Invocation, got {:?}", err),
    }

    let reply = greeter.invoke(&greet, vec![Value::from("bob").into()]).await.expect("invoke");
    assert_eq!(reply.into_value(), Some(Value::from("hello bob")));
}
