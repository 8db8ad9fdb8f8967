//! # Raw Channels
//!
//! Token-addressed byte tunnels multiplexed over a session.
//!
//! The receiving application registers a listener and hands the token to its
//! peer out of band (typically as the result of a remote call). The peer opens
//! the channel by token, writes bytes, and closes it.
//!
//! ## Invariants
//! - One token maps to exactly one listener at a time.
//! - Closing twice, or writing after close, never panics; the late operation
//!   finds no listener and reports it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use remrpc::Message;

use crate::dispatcher::Dispatcher;
use crate::error::CallError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No listener is registered for the token.
    NoListener(u32),
    /// The peer has no listener for the token.
    Refused(u32),
    /// The listener failed while handling data or close.
    Listener(String),
    /// The local handle was already closed.
    Closed(u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoListener(token) => write!(f, "no raw channel listener for token {}", token),
            Error::Refused(token) => write!(f, "peer refused raw channel {}", token),
            Error::Listener(msg) => write!(f, "raw channel listener failed: {}", msg),
            Error::Closed(token) => write!(f, "raw channel {} is closed", token),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Application sink for the bytes of one raw channel.
pub trait RawChannelListener: Send + Sync + 'static {
    fn write(&self, data: &[u8]) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Token to listener map, shared by every session of a runtime.
pub struct RawChannelRegistry {
    listeners: DashMap<u32, Arc<dyn RawChannelListener>>,
    next_token: AtomicU32,
}

impl Default for RawChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RawChannelRegistry {
    pub fn new() -> Self {
        Self { listeners: DashMap::new(), next_token: AtomicU32::new(1) }
    }

    /// Registers a listener under a fresh token.
    pub fn register(&self, listener: Arc<dyn RawChannelListener>) -> u32 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(token, listener);
        tracing::debug!(token, "raw channel listener registered");
        token
    }

    /// Removes a listener without notifying it.
    pub fn unregister(&self, token: u32) -> Option<Arc<dyn RawChannelListener>> {
        self.listeners.remove(&token).map(|(_, l)| l)
    }

    pub fn contains(&self, token: u32) -> bool {
        self.listeners.contains_key(&token)
    }

    /// Forwards bytes to the listener.
    pub fn write(&self, token: u32, data: &[u8]) -> Result<()> {
        // Clone out of the map so the listener never runs under a shard lock.
        let listener = self
            .listeners
            .get(&token)
            .map(|l| l.clone())
            .ok_or(Error::NoListener(token))?;
        listener.write(data)
    }

    /// Deregisters the listener and tells it the channel closed.
    pub fn close(&self, token: u32) -> Result<()> {
        let (_, listener) = self.listeners.remove(&token).ok_or(Error::NoListener(token))?;
        tracing::debug!(token, "raw channel closed");
        listener.close()
    }
}

/// The writing end of a raw channel opened on a peer.
///
/// Each write waits for the peer's acknowledgement, which keeps the bytes of
/// one channel in order.
pub struct RawChannel {
    dispatcher: Arc<Dispatcher>,
    token: u32,
    closed: AtomicBool,
}

impl RawChannel {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, token: u32) -> Self {
        Self { dispatcher, token, closed: AtomicBool::new(false) }
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn write(&self, data: &[u8]) -> std::result::Result<(), CallError> {
        if self.is_closed() {
            return Err(CallError::RawChannel(Error::Closed(self.token)));
        }
        let token = self.token;
        let reply = self
            .dispatcher
            .call(|seq| Message::RawChannelData { seq, token, data: data.to_vec() })
            .await?;
        match reply {
            Message::RawChannelDataReturn { error: None, .. } => Ok(()),
            Message::RawChannelDataReturn { error: Some(_), .. } => {
                Err(CallError::RawChannel(Error::NoListener(token)))
            }
            other => Err(CallError::unexpected(&other)),
        }
    }

    /// Closes the channel on the peer. Closing an already closed handle is a no-op.
    pub async fn close(&self) -> std::result::Result<(), CallError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let token = self.token;
        let reply = self.dispatcher.call(|seq| Message::CloseRawChannel { seq, token }).await?;
        match reply {
            Message::CloseRawChannelReturn { closed: true, .. } => Ok(()),
            Message::CloseRawChannelReturn { error, .. } => Err(CallError::RawChannel(Error::Listener(
                error.unwrap_or_else(|| format!("peer could not close raw channel {}", token)),
            ))),
            other => Err(CallError::unexpected(&other)),
        }
    }
}

impl std::fmt::Debug for RawChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawChannel")
            .field("token", &self.token)
            .field("session", &self.dispatcher.session())
            .field("closed", &self.is_closed())
            .finish()
    }
}
