//! Shared fixtures: a calculator, a listener hub, and a wired pair of runtimes.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use remrun::Arg;
use remrun::CallContext;
use remrun::Capabilities;
use remrun::Config;
use remrun::Dispatcher;
use remrun::DuplexTransport;
use remrun::Interface;
use remrun::MethodDescriptor;
use remrun::RawChannelListener;
use remrun::RemoteException;
use remrun::RemoteObject;
use remrun::RemoteProxy;
use remrun::Returned;
use remrun::Runtime;
use remrun::Value;
use remrun::expect_args;
use remrun::raw;

pub const DIVIDE_BY_ZERO: &str = "demo.DivideByZero";

// ============================================================================
// INTERFACES
// ============================================================================

pub fn named() -> Arc<Interface> {
    Interface::new("demo.Named")
        .method(MethodDescriptor::new("name", &[], "String"))
        .build()
}

pub fn calculator() -> Arc<Interface> {
    Interface::new("demo.Calculator")
        .extends(named())
        .method(MethodDescriptor::new("add", &["int", "int"], "int"))
        .method(MethodDescriptor::new("nothing", &[], "void"))
        .method(MethodDescriptor::new("maybe_null", &["boolean"], "String"))
        .method(MethodDescriptor::new("divide", &["int", "int"], "int").throws(&[DIVIDE_BY_ZERO]))
        .method(MethodDescriptor::new("undeclared", &[], "int"))
        .method(MethodDescriptor::new("explode", &[], "int"))
        .method(MethodDescriptor::new("slow", &["long"], "long"))
        .method(MethodDescriptor::new("square_later", &["int"], "Future"))
        .method(MethodDescriptor::new("fail_later", &["String"], "Future").throws(&[DIVIDE_BY_ZERO]))
        .method(MethodDescriptor::new("never", &[], "Future"))
        .build()
}

pub fn listener() -> Arc<Interface> {
    Interface::new("demo.Listener")
        .method(MethodDescriptor::new("notify", &["String"], "void"))
        .build()
}

pub fn hub() -> Arc<Interface> {
    Interface::new("demo.Hub")
        .method(MethodDescriptor::new("subscribe", &["demo.Listener"], "void"))
        .method(MethodDescriptor::new("fire", &["String"], "int"))
        .method(MethodDescriptor::new("clear", &[], "void"))
        .method(MethodDescriptor::new("echo", &["demo.Listener"], "demo.Listener"))
        .method(MethodDescriptor::new("make_listener", &[], "demo.Listener"))
        .method(MethodDescriptor::new("calculator", &[], "demo.Calculator"))
        .build()
}

/// Looks a method up by name on `iface` or its parents.
pub fn method(iface: &Interface, name: &str) -> MethodDescriptor {
    iface
        .find_by_name(name)
        .cloned()
        .unwrap_or_else(|| panic!("no method '{}' on {}", name, iface.name()))
}

fn int(arg: &Arg) -> Result<i32, RemoteException> {
    arg.value()
        .and_then(Value::as_i32)
        .ok_or_else(|| RemoteException::new("IllegalArgument", format!("expected int, got {:?}", arg)))
}

// ============================================================================
// CALCULATOR
// ============================================================================

pub struct Calculator;

#[async_trait::async_trait]
impl RemoteObject for Calculator {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new().implements(calculator())
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        method: &MethodDescriptor,
        args: Vec<Arg>,
    ) -> Result<Returned, RemoteException> {
        expect_args(method, &args)?;
        match method.name() {
            "name" => Ok(Value::from("calculator").into()),
            "add" => Ok(Value::I32(int(&args[0])? + int(&args[1])?).into()),
            "nothing" => Ok(Returned::Void),
            "maybe_null" => match args[0].value().and_then(Value::as_bool) {
                Some(true) => Ok(Value::Null.into()),
                _ => Ok(Value::from("present").into()),
            },
            "divide" => {
                let (a, b) = (int(&args[0])?, int(&args[1])?);
                if b == 0 {
                    return Err(RemoteException::new(DIVIDE_BY_ZERO, format!("{} / 0", a)));
                }
                Ok(Value::I32(a / b).into())
            }
            "undeclared" => Err(RemoteException::new("demo.Oops", "not on the contract")),
            "explode" => panic!("calculator exploded"),
            "slow" => {
                let ms = args[0].value().and_then(Value::as_i64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                Ok(Value::I64(ms).into())
            }
            "square_later" => {
                let n = int(&args[0])?;
                Ok(Returned::Deferred(Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, RemoteException>(Value::I32(n * n))
                })))
            }
            "fail_later" => {
                let why = args[0].value().and_then(Value::as_str).unwrap_or_default().to_owned();
                Ok(Returned::Deferred(Box::pin(async move {
                    Err::<Value, _>(RemoteException::new(DIVIDE_BY_ZERO, why))
                })))
            }
            "never" => Ok(Returned::Deferred(Box::pin(futures::future::pending::<Result<Value, RemoteException>>()))),
            other => Err(RemoteException::new("NoSuchMethod", other.to_owned())),
        }
    }

    fn describe(&self) -> String {
        "Calculator".to_owned()
    }

    fn hash_code(&self) -> i32 {
        42
    }
}

// ============================================================================
// LISTENERS
// ============================================================================

/// Records every notification it receives.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl RemoteObject for Recorder {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new().implements(listener())
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        method: &MethodDescriptor,
        args: Vec<Arg>,
    ) -> Result<Returned, RemoteException> {
        expect_args(method, &args)?;
        let event = args[0].value().and_then(Value::as_str).unwrap_or_default().to_owned();
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(Returned::Void)
    }

    fn describe(&self) -> String {
        "Recorder".to_owned()
    }
}

/// Keeps listener proxies and notifies them on `fire`.
#[derive(Default)]
pub struct Hub {
    listeners: tokio::sync::Mutex<Vec<RemoteProxy>>,
}

#[async_trait::async_trait]
impl RemoteObject for Hub {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new().implements(hub())
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        method: &MethodDescriptor,
        args: Vec<Arg>,
    ) -> Result<Returned, RemoteException> {
        expect_args(method, &args)?;
        match method.name() {
            "subscribe" => {
                let proxy = args[0]
                    .proxy()
                    .cloned()
                    .ok_or_else(|| RemoteException::new("IllegalArgument", "expected a listener"))?;
                self.listeners.lock().await.push(proxy);
                Ok(Returned::Void)
            }
            "fire" => {
                let notify = self::method(&listener(), "notify");
                let listeners = self.listeners.lock().await.clone();
                let mut delivered = 0;
                for l in &listeners {
                    if l.invoke(&notify, vec![args[0].clone()]).await.is_ok() {
                        delivered += 1;
                    }
                }
                Ok(Value::I32(delivered).into())
            }
            "clear" => {
                self.listeners.lock().await.clear();
                Ok(Returned::Void)
            }
            "echo" => match &args[0] {
                Arg::Remote(p) => Ok(Returned::Remote(p.clone())),
                Arg::Local(o) => Ok(Returned::Local(o.clone())),
                Arg::Value(v) => Ok(Returned::Value(v.clone())),
            },
            "make_listener" => Ok(Returned::Local(Arc::new(Recorder::default()))),
            "calculator" => Ok(Returned::Local(Arc::new(Calculator))),
            other => Err(RemoteException::new("NoSuchMethod", other.to_owned())),
        }
    }
}

// ============================================================================
// RAW CHANNELS
// ============================================================================

#[derive(Default)]
pub struct Sink {
    data: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl Sink {
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl RawChannelListener for Sink {
    fn write(&self, data: &[u8]) -> raw::Result<()> {
        self.data
            .lock()
            .map(|mut d| d.extend_from_slice(data))
            .map_err(|e| raw::Error::Listener(e.to_string()))
    }

    fn close(&self) -> raw::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ============================================================================
// WIRING
// ============================================================================

/// Two runtimes joined by an in-memory transport.
///
/// The server binds a `Calculator` as "calc" and a `Hub` as "hub".
pub struct Pair {
    pub server: Runtime,
    pub client: Runtime,
    pub server_side: Arc<Dispatcher>,
    pub client_side: Arc<Dispatcher>,
}

pub fn pair_with(config: Config) -> Pair {
    let server = Runtime::new(config.clone());
    let client = Runtime::new(config);
    server.bind("calc", Arc::new(Calculator)).expect("bind calc");
    server.bind("hub", Arc::new(Hub::default())).expect("bind hub");

    let (a, b) = DuplexTransport::pair();
    let server_side = server.attach(a);
    let client_side = client.attach(b);
    Pair { server, client, server_side, client_side }
}

/// A pair without keepalive, so tests are not sensitive to timing.
pub fn pair() -> Pair {
    pair_with(Config::default().without_keepalive())
}

/// Polls `check` until it holds, for at most one second.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
