//! # Values
//!
//! The closed set of things that can travel as an argument, a return value, or
//! a thrown exception.
//!
//! ## Invariants
//! - `Null` and `Void` are distinct. `Void` is the reified result of a method
//!   that returns nothing; `Null` is a genuine absent value.
//! - `EndpointRef`, `Callback` and `AsyncRef` are placeholders. They never carry
//!   object state, only the identifiers the receiving side resolves.

/// A value carried across the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Result of a method without a return value.
    Void,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered, string-keyed pairs.
    Map(Vec<(String, Value)>),
    /// A thrown exception, transported as a value.
    Exception(RemoteException),
    /// Names an object the *receiver* owns.
    EndpointRef(String),
    /// A callable object owned by the *sender*, exported under `id`.
    Callback { id: String, interfaces: Vec<String> },
    /// Surrogate for a deferred result, completed later by an `AsyncFinished` push.
    AsyncRef(u64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Short, human-readable kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Exception(_) => "exception",
            Value::EndpointRef(_) => "endpoint-ref",
            Value::Callback { .. } => "callback",
            Value::AsyncRef(_) => "async-ref",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::I32(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::I64(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::F64(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_owned()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

impl From<RemoteException> for Value {
    fn from(e: RemoteException) -> Self { Value::Exception(e) }
}

/// The exception carrier.
///
/// `class` identifies the failure kind, and is what a call site matches against
/// a method's declared `throws` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteException {
    pub class: String,
    pub message: Option<String>,
    pub cause: Option<Box<RemoteException>>,
}

impl RemoteException {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: Some(message.into()),
            cause: None,
        }
    }

    /// An exception without a message.
    pub fn bare(class: impl Into<String>) -> Self {
        Self { class: class.into(), message: None, cause: None }
    }

    pub fn with_cause(mut self, cause: RemoteException) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Follows the `cause` chain to its end.
    pub fn root_cause(&self) -> &RemoteException {
        let mut current = self;
        while let Some(next) = current.cause.as_deref() {
            current = next;
        }
        current
    }
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.class, msg)?,
            None => write!(f, "{}", self.class)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
