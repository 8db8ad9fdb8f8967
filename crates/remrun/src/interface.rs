//! # Interface Descriptors
//!
//! Static declarations of what a remote object exposes. They replace runtime
//! type introspection: an object states its interfaces once, and the lookup
//! table caches the resolved set at bind time.
//!
//! ## Invariants
//! - A method is identified on the wire by the hash of its full signature
//!   (return type, name, parameter types), so overloads never collide by name.
//! - The hash is the first eight bytes of the SHA-256 digest, assembled
//!   Little-Endian, and memoized process-wide per signature.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::LazyLock;

use dashmap::DashMap;
use sha2::Digest;
use sha2::Sha256;

static SIGNATURE_HASHES: LazyLock<DashMap<String, u64>> = LazyLock::new(DashMap::new);

/// Hashes a method signature, memoizing the result.
pub fn signature_hash(signature: &str) -> u64 {
    if let Some(hash) = SIGNATURE_HASHES.get(signature) {
        return *hash;
    }
    let digest = Sha256::digest(signature.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    let hash = u64::from_le_bytes(first);
    SIGNATURE_HASHES.insert(signature.to_owned(), hash);
    hash
}

/// One remotely callable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    name: String,
    params: Vec<String>,
    ret: String,
    throws: Vec<String>,
    signature: String,
    hash: u64,
}

impl MethodDescriptor {
    /// Declares a method. Use `"void"` as `ret` for methods without a result.
    pub fn new(name: &str, params: &[&str], ret: &str) -> Self {
        let params: Vec<String> = params.iter().map(|p| (*p).to_owned()).collect();
        let signature = format!("{} {}({})", ret, name, params.join(","));
        let hash = signature_hash(&signature);
        Self {
            name: name.to_owned(),
            params,
            ret: ret.to_owned(),
            throws: Vec::new(),
            signature,
            hash,
        }
    }

    /// Declares the exception classes the method may raise to callers.
    pub fn throws(mut self, classes: &[&str]) -> Self {
        self.throws = classes.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn ret(&self) -> &str {
        &self.ret
    }

    pub fn is_void(&self) -> bool {
        self.ret == "void"
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether `class` is in the declared `throws` list.
    pub fn declares(&self, class: &str) -> bool {
        self.throws.iter().any(|t| t == class)
    }
}

/// A named group of methods, possibly extending other interfaces.
#[derive(Debug)]
pub struct Interface {
    name: String,
    methods: Vec<MethodDescriptor>,
    extends: Vec<Arc<Interface>>,
}

impl Interface {
    /// `name` is the canonical name used by interface lookup.
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), methods: Vec::new(), extends: Vec::new() }
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn extends(mut self, parent: Arc<Interface>) -> Self {
        self.extends.push(parent);
        self
    }

    pub fn build(self) -> Arc<Interface> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Methods declared directly on this interface.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn parents(&self) -> &[Arc<Interface>] {
        &self.extends
    }

    /// Finds a method by name, here or in any super-interface.
    pub fn find_by_name(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .or_else(|| self.extends.iter().find_map(|p| p.find_by_name(name)))
    }
}

/// What an object declares about its remote surface.
///
/// `explicit` wins when non-empty. Otherwise the exposed set is `implemented`
/// expanded through super-interfaces, followed by whatever `base` exposes.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    explicit: Vec<Arc<Interface>>,
    implemented: Vec<Arc<Interface>>,
    base: Option<Box<Capabilities>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes exactly these interfaces, ignoring everything else.
    pub fn explicit(mut self, iface: Arc<Interface>) -> Self {
        self.explicit.push(iface);
        self
    }

    /// Adds a directly implemented interface.
    pub fn implements(mut self, iface: Arc<Interface>) -> Self {
        self.implemented.push(iface);
        self
    }

    /// Inherits the surface of a composed base object.
    pub fn inherit(mut self, base: Capabilities) -> Self {
        self.base = Some(Box::new(base));
        self
    }

    /// The exposed interfaces, deduplicated by name in discovery order.
    pub fn resolve(&self) -> Vec<Arc<Interface>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        if !self.explicit.is_empty() {
            for iface in &self.explicit {
                if seen.insert(iface.name.clone()) {
                    out.push(iface.clone());
                }
            }
            return out;
        }

        let mut queue: VecDeque<Arc<Interface>> = self.implemented.iter().cloned().collect();
        while let Some(iface) = queue.pop_front() {
            if !seen.insert(iface.name.clone()) {
                continue;
            }
            queue.extend(iface.extends.iter().cloned());
            out.push(iface);
        }

        if let Some(base) = &self.base {
            for iface in base.resolve() {
                if seen.insert(iface.name.clone()) {
                    out.push(iface);
                }
            }
        }
        out
    }
}
