//! # Runtime
//!
//! Owns what every session shares: the lookup table, the raw channel
//! registry, the codec and the configuration. Each attached transport becomes
//! a session with its own dispatcher.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use remrpc::Codec;
use tokio::net::TcpListener;
use tokio::net::ToSocketAddrs;

use crate::config::Config;
use crate::dispatcher::CloseHook;
use crate::dispatcher::Dispatcher;
use crate::dispatcher::Services;
use crate::lookup;
use crate::lookup::LookupTable;
use crate::object::RemoteObject;
use crate::raw::RawChannelListener;
use crate::raw::RawChannelRegistry;
use crate::session::SessionId;
use crate::transport;
use crate::transport::Transport;
use crate::transport::tcp::TcpTransport;

/// The central registry. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    services: Services,
    sessions: Arc<DashMap<SessionId, Arc<Dispatcher>>>,
    next_session: AtomicU64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self::with_codec(config, Codec::new())
    }

    /// A runtime whose sessions use `codec`, e.g. one with a custom serializer.
    pub fn with_codec(config: Config, codec: Codec) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                services: Services {
                    codec: Arc::new(codec),
                    lookup: Arc::new(LookupTable::new()),
                    raw: Arc::new(RawChannelRegistry::new()),
                    config,
                },
                sessions: Arc::new(DashMap::new()),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.services.config
    }

    pub fn lookup(&self) -> &Arc<LookupTable> {
        &self.inner.services.lookup
    }

    pub fn raw_channels(&self) -> &Arc<RawChannelRegistry> {
        &self.inner.services.raw
    }

    /// Makes `object` reachable by name from every session.
    pub fn bind(&self, name: &str, object: Arc<dyn RemoteObject>) -> lookup::Result<()> {
        self.lookup().bind(name, object)
    }

    pub fn unbind(&self, name: &str) -> lookup::Result<()> {
        self.lookup().unbind(name)
    }

    /// Registers a listener and returns the token a peer opens it by.
    pub fn register_raw_channel(&self, listener: Arc<dyn RawChannelListener>) -> u32 {
        self.raw_channels().register(listener)
    }

    pub fn unregister_raw_channel(&self, token: u32) -> bool {
        self.raw_channels().unregister(token).is_some()
    }

    /// Starts a session over `transport`.
    pub fn attach(&self, transport: impl Transport) -> Arc<Dispatcher> {
        self.attach_shared(Arc::new(transport))
    }

    pub fn attach_shared(&self, transport: Arc<dyn Transport>) -> Arc<Dispatcher> {
        let id = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        let sessions = Arc::downgrade(&self.inner.sessions);
        let on_close: CloseHook = Box::new(move |id| {
            if let Some(sessions) = sessions.upgrade() {
                sessions.remove(&id);
            }
        });

        let dispatcher = Dispatcher::start(id, transport, self.inner.services.clone(), Some(on_close));
        self.inner.sessions.insert(id, dispatcher.clone());
        // The session may have ended before it was recorded.
        if dispatcher.is_closed() {
            self.inner.sessions.remove(&id);
        }
        dispatcher
    }

    /// Connects to a peer over TCP.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> transport::Result<Arc<Dispatcher>> {
        let transport = TcpTransport::connect(addr, self.config().max_frame_len).await?;
        Ok(self.attach(transport))
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let dispatcher = self.attach(TcpTransport::from_stream(stream, self.config().max_frame_len));
            tracing::info!(%addr, session = %dispatcher.session(), "accepted connection");
        }
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Dispatcher>> {
        self.inner.sessions.get(&id).map(|d| d.clone())
    }

    /// Live sessions, in creation order.
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Closes every session.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<Dispatcher>> = self.inner.sessions.iter().map(|e| e.value().clone()).collect();
        for dispatcher in live {
            dispatcher.close().await;
        }
    }
}
