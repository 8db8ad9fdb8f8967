//! # Pending Calls and Deferred Results
//!
//! Two correlation tables owned by each dispatcher.
//!
//! ## Invariants
//! - A pending call is fulfilled at most once: whoever removes the entry from
//!   the map owns the sender. Fulfillment, cancellation and session failure all
//!   go through `remove`.
//! - A deferred result may finish before the caller attaches to it. The outcome
//!   is then parked until `attach` takes it, the id is abandoned, or the
//!   session fails. At most `MAX_PARKED` outcomes and tombstones are held.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rempack::RemoteException;
use rempack::Value;
use remrpc::Message;
use tokio::sync::oneshot;

use crate::lookup::Container;
use crate::session::SessionError;

/// Upper bound on parked outcomes and tombstones per session.
pub(crate) const MAX_PARKED: usize = 4096;

/// A reply as routed by the pump.
#[derive(Debug)]
pub(crate) struct Delivered {
    pub msg: Message,
    /// The local object an `EndpointRef` result names, resolved before any
    /// later frame was handled.
    pub endpoint: Option<Arc<Container>>,
}

impl From<Message> for Delivered {
    fn from(msg: Message) -> Self {
        Self { msg, endpoint: None }
    }
}

pub(crate) type Reply = Result<Delivered, SessionError>;

/// In-flight requests keyed by sequence id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: DashMap<u64, oneshot::Sender<Reply>>,
}

impl PendingCalls {
    pub fn register(&self, seq: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.calls.insert(seq, tx);
        rx
    }

    /// Routes a reply. Hands it back if nobody takes it.
    pub fn fulfill(&self, seq: u64, reply: Delivered) -> Option<Delivered> {
        match self.calls.remove(&seq) {
            Some((_, tx)) => tx.send(Ok(reply)).err().and_then(|r| r.ok()),
            None => Some(reply),
        }
    }

    pub fn cancel(&self, seq: u64) -> bool {
        self.calls.remove(&seq).is_some()
    }

    /// Fails every waiter. Returns how many were released.
    pub fn fail_all(&self, reason: &SessionError) -> usize {
        let keys: Vec<u64> = self.calls.iter().map(|e| *e.key()).collect();
        let mut released = 0;
        for key in keys {
            if let Some((_, tx)) = self.calls.remove(&key) {
                let _ = tx.send(Err(reason.clone()));
                released += 1;
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Outcome of a deferred computation on the peer.
pub(crate) type AsyncOutcome = Result<Value, RemoteException>;

enum Slot {
    Waiting(oneshot::Sender<Result<AsyncOutcome, SessionError>>),
    Finished(AsyncOutcome),
    /// Nobody will attach; the completion is dropped on arrival.
    Abandoned,
}

pub(crate) enum Attached {
    Ready(AsyncOutcome),
    Waiting(oneshot::Receiver<Result<AsyncOutcome, SessionError>>),
}

/// Deferred results keyed by outstanding id.
#[derive(Default)]
pub(crate) struct AsyncTable {
    slots: DashMap<u64, Slot>,
}

impl AsyncTable {
    /// Called by the caller side once it learns the outstanding id.
    pub fn attach(&self, id: u64) -> Attached {
        match self.slots.entry(id) {
            Entry::Occupied(mut slot) => {
                let (tx, rx) = oneshot::channel();
                match std::mem::replace(slot.get_mut(), Slot::Waiting(tx)) {
                    Slot::Finished(outcome) => {
                        slot.remove();
                        Attached::Ready(outcome)
                    }
                    // A second attach for the same id; the newest waiter wins.
                    Slot::Waiting(_) | Slot::Abandoned => Attached::Waiting(rx),
                }
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(Slot::Waiting(tx));
                Attached::Waiting(rx)
            }
        }
    }

    /// Called when the `AsyncFinished` push arrives.
    pub fn complete(&self, id: u64, outcome: AsyncOutcome) {
        // Measured before taking the entry: `len` locks every shard.
        let full = self.slots.len() >= MAX_PARKED;
        match self.slots.entry(id) {
            Entry::Occupied(slot) => {
                if matches!(slot.get(), Slot::Finished(_)) {
                    tracing::debug!(id, "duplicate async completion dropped");
                    return;
                }
                match slot.remove() {
                    Slot::Waiting(tx) => {
                        let _ = tx.send(Ok(outcome));
                    }
                    _ => tracing::debug!(id, "completion of abandoned async result dropped"),
                }
            }
            Entry::Vacant(_) if full => {
                tracing::warn!(id, parked = MAX_PARKED, "async completion dropped, too many parked");
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Finished(outcome));
            }
        }
    }

    /// Forgets `id`: its caller stopped waiting before learning it.
    ///
    /// A parked outcome is dropped; a completion still to come is dropped on
    /// arrival.
    pub fn abandon(&self, id: u64) {
        let full = self.slots.len() >= MAX_PARKED;
        match self.slots.entry(id) {
            Entry::Occupied(slot) => {
                if matches!(slot.get(), Slot::Finished(_)) {
                    slot.remove();
                }
            }
            Entry::Vacant(_) if full => {
                tracing::warn!(id, parked = MAX_PARKED, "async tombstone dropped, too many parked");
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Abandoned);
            }
        }
    }

    pub fn fail_all(&self, reason: &SessionError) -> usize {
        let keys: Vec<u64> = self.slots.iter().map(|e| *e.key()).collect();
        let mut released = 0;
        for key in keys {
            if let Some((_, Slot::Waiting(tx))) = self.slots.remove(&key) {
                let _ = tx.send(Err(reason.clone()));
                released += 1;
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
