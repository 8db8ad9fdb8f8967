//! # Lookup Table
//!
//! Process-wide registry of bound objects (by name) and exported callbacks
//! (by id, scoped to the session that received them).
//!
//! ## Invariants
//! - A name is bound at most once. A failed `bind` leaves the existing binding
//!   untouched.
//! - Every container has a non-empty interface set, computed before it becomes
//!   visible. Readers never observe a partially built container.
//! - A callback is reachable until its reference count drops to zero or its
//!   session is purged. Afterwards every resolve fails.
//! - Callback ids are never reused. Exporting an instance again while it is
//!   live yields its current id; after release it gets a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::interface::Interface;
use crate::interface::MethodDescriptor;
use crate::object::RemoteObject;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The name already has a binding.
    AlreadyBound(String),
    /// `unbind` of a name without a binding.
    NotBound(String),
    /// The object exposes no remote interface.
    NoRemoteInterfaces(String),
    /// No binding or callback matches.
    LookupFailed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AlreadyBound(name) => write!(f, "name '{}' is already bound", name),
            Error::NotBound(name) => write!(f, "name '{}' is not bound", name),
            Error::NoRemoteInterfaces(name) => write!(f, "object for '{}' exposes no remote interface", name),
            Error::LookupFailed(what) => write!(f, "lookup failed: {}", what),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A resolved remote object: the instance, its interface set, and its method table.
pub struct Container {
    name: String,
    object: Arc<dyn RemoteObject>,
    interfaces: Vec<Arc<Interface>>,
    methods: HashMap<u64, MethodDescriptor>,
    order: u64,
}

impl Container {
    fn build(name: &str, object: Arc<dyn RemoteObject>, order: u64) -> Result<Self> {
        let interfaces = object.capabilities().resolve();
        if interfaces.is_empty() {
            return Err(Error::NoRemoteInterfaces(name.to_owned()));
        }

        let mut methods = HashMap::new();
        for iface in &interfaces {
            collect_methods(iface, &mut methods);
        }

        Ok(Self { name: name.to_owned(), object, interfaces, methods, order })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> &Arc<dyn RemoteObject> {
        &self.object
    }

    pub fn interfaces(&self) -> &[Arc<Interface>] {
        &self.interfaces
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.interfaces.iter().map(|i| i.name().to_owned()).collect()
    }

    pub fn implements(&self, canonical: &str) -> bool {
        self.interfaces.iter().any(|i| i.name() == canonical)
    }

    /// Resolves a method by signature hash.
    pub fn method(&self, hash: u64) -> Option<&MethodDescriptor> {
        self.methods.get(&hash)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("interfaces", &self.interface_names())
            .finish()
    }
}

fn collect_methods(iface: &Interface, out: &mut HashMap<u64, MethodDescriptor>) {
    for method in iface.methods() {
        out.entry(method.hash()).or_insert_with(|| method.clone());
    }
    for parent in iface.parents() {
        collect_methods(parent, out);
    }
}

struct CallbackRef {
    session: SessionId,
    container: Arc<Container>,
    count: usize,
}

/// Registry shared by every session of a runtime.
pub struct LookupTable {
    bindings: DashMap<String, Arc<Container>>,
    callbacks: DashMap<String, CallbackRef>,
    /// Live callback id per (session, instance address).
    exported: DashMap<(SessionId, usize), String>,
    bind_order: AtomicU64,
    next_callback: AtomicU64,
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupTable {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            callbacks: DashMap::new(),
            exported: DashMap::new(),
            bind_order: AtomicU64::new(1),
            next_callback: AtomicU64::new(1),
        }
    }

    /// Binds `object` under `name`.
    pub fn bind(&self, name: &str, object: Arc<dyn RemoteObject>) -> Result<()> {
        if self.bindings.contains_key(name) {
            return Err(Error::AlreadyBound(name.to_owned()));
        }
        let order = self.bind_order.fetch_add(1, Ordering::Relaxed);
        let container = Arc::new(Container::build(name, object, order)?);

        match self.bindings.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(Error::AlreadyBound(name.to_owned())),
            Entry::Vacant(slot) => {
                tracing::debug!(name, interfaces = ?container.interface_names(), "bound remote object");
                slot.insert(container);
                Ok(())
            }
        }
    }

    pub fn unbind(&self, name: &str) -> Result<()> {
        match self.bindings.remove(name) {
            Some(_) => {
                tracing::debug!(name, "unbound remote object");
                Ok(())
            }
            None => Err(Error::NotBound(name.to_owned())),
        }
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<Arc<Container>> {
        self.bindings
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| Error::LookupFailed(format!("no object bound to '{}'", name)))
    }

    /// The earliest bound object exposing `canonical`.
    pub fn resolve_by_interface(&self, canonical: &str) -> Result<Arc<Container>> {
        self.bindings
            .iter()
            .filter(|c| c.implements(canonical))
            .min_by_key(|c| c.order)
            .map(|c| c.clone())
            .ok_or_else(|| Error::LookupFailed(format!("no object implements '{}'", canonical)))
    }

    pub fn bound_names(&self) -> Vec<String> {
        let mut names: Vec<(u64, String)> = self.bindings.iter().map(|c| (c.order, c.key().clone())).collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Whether this exact instance is bound under some name.
    pub fn is_bound(&self, object: &Arc<dyn RemoteObject>) -> bool {
        self.bindings.iter().any(|c| Arc::ptr_eq(c.object(), object))
    }

    /// Exports `object` to `session`, returning its id and interface names.
    ///
    /// Exporting a live instance again on the same session yields the same id
    /// and bumps its count.
    pub fn register_callback(&self, session: SessionId, object: Arc<dyn RemoteObject>) -> Result<(String, Vec<String>)> {
        let key = (session, instance_addr(&object));
        let live = self.exported.get(&key).map(|id| id.clone());
        if let Some(id) = live {
            if let Some(mut entry) = self.callbacks.get_mut(&id) {
                entry.count += 1;
                tracing::trace!(%session, id = %id, count = entry.count, "callback re-exported");
                return Ok((id, entry.container.interface_names()));
            }
        }

        let id = format!("cb-{}-{}", session.0, self.next_callback.fetch_add(1, Ordering::Relaxed));
        let container = Arc::new(Container::build(&id, object, 0)?);
        let names = container.interface_names();
        self.callbacks.insert(id.clone(), CallbackRef { session, container, count: 1 });
        self.exported.insert(key, id.clone());
        tracing::trace!(%session, id = %id, "callback exported");
        Ok((id, names))
    }

    /// Drops one reference. Returns true once the callback is gone.
    pub fn release_callback(&self, session: SessionId, id: &str) -> Result<bool> {
        let gone = match self.callbacks.entry(id.to_owned()) {
            Entry::Occupied(mut slot) if slot.get().session == session => {
                let entry = slot.get_mut();
                entry.count -= 1;
                if entry.count > 0 {
                    return Ok(false);
                }
                slot.remove()
            }
            _ => return Err(Error::LookupFailed(format!("no callback '{}' for {}", id, session))),
        };
        // `gone` still owns the instance, so its address is not yet reusable.
        let key = (session, instance_addr(gone.container.object()));
        self.exported.remove_if(&key, |_, live| live == id);
        tracing::trace!(%session, id, "callback released");
        Ok(true)
    }

    pub fn resolve_callback(&self, session: SessionId, id: &str) -> Result<Arc<Container>> {
        match self.callbacks.get(id) {
            Some(entry) if entry.session == session => Ok(entry.container.clone()),
            _ => Err(Error::LookupFailed(format!("no callback '{}' for {}", id, session))),
        }
    }

    /// Resolves a bound name first, then a callback exported to `session`.
    pub fn resolve_target(&self, session: SessionId, name: &str) -> Result<Arc<Container>> {
        self.resolve_by_name(name).or_else(|_| self.resolve_callback(session, name))
    }

    pub fn callback_count(&self, session: SessionId) -> usize {
        self.callbacks.iter().filter(|e| e.session == session).count()
    }

    /// Removes every callback exported to `session`.
    pub fn purge_session(&self, session: SessionId) -> usize {
        let before = self.callbacks.len();
        self.callbacks.retain(|_, e| e.session != session);
        let purged = before.saturating_sub(self.callbacks.len());
        self.exported.retain(|(owner, _), _| *owner != session);
        if purged > 0 {
            tracing::debug!(%session, purged, "purged callbacks");
        }
        purged
    }
}

fn instance_addr(object: &Arc<dyn RemoteObject>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}
