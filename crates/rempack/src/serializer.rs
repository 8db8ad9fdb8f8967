//! # Object Serializer
//!
//! Converts `Value`s to and from bytes. The message codec treats the output as
//! an opaque blob, so any implementation of `ObjectSerializer` can be swapped in.
//!
//! ## Default Format (`PackSerializer`)
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Count: 4b][Items..]`
//! - **Exceptions**: `[Tag][class][opt message][has_cause][cause..]`

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::RemoteException;
use crate::Result;
use crate::Value;

/// The maximum nesting depth for values before decoding or encoding fails.
pub const MAX_DEPTH: usize = 64;

/// Most items reserved up front for a decoded container. Larger ones grow as
/// items actually arrive.
pub const MAX_PREALLOC: usize = 1024;

/// Identifies the kind of an encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Null = 0x00,
    Void = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    I8 = 0x04,
    I16 = 0x05,
    I32 = 0x06,
    I64 = 0x07,
    F32 = 0x08,
    F64 = 0x09,
    Char = 0x0A,

    // Blobs
    String = 0x10,
    Bytes = 0x11,

    // Containers
    List = 0x20,
    Map = 0x21,

    // Remote placeholders
    Exception = 0x30,
    EndpointRef = 0x31,
    Callback = 0x32,
    AsyncRef = 0x33,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Tag::Null),
            0x01 => Some(Tag::Void),
            0x02 => Some(Tag::BoolTrue),
            0x03 => Some(Tag::BoolFalse),
            0x04 => Some(Tag::I8),
            0x05 => Some(Tag::I16),
            0x06 => Some(Tag::I32),
            0x07 => Some(Tag::I64),
            0x08 => Some(Tag::F32),
            0x09 => Some(Tag::F64),
            0x0A => Some(Tag::Char),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x30 => Some(Tag::Exception),
            0x31 => Some(Tag::EndpointRef),
            0x32 => Some(Tag::Callback),
            0x33 => Some(Tag::AsyncRef),
            _ => None,
        }
    }
}

/// Reads and writes application values over the byte cursor.
///
/// # Invariants
/// - `read_value` must consume exactly the bytes `write_value` produced for the
///   same value. The codec verifies this by finishing the enclosing blob.
pub trait ObjectSerializer: Send + Sync + 'static {
    fn write_value(&self, enc: &mut Encoder, value: &Value) -> Result<()>;
    fn read_value(&self, dec: &mut Decoder<'_>) -> Result<Value>;
}

/// The default tag-length-value serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackSerializer;

impl ObjectSerializer for PackSerializer {
    fn write_value(&self, enc: &mut Encoder, value: &Value) -> Result<()> {
        write_value_impl(enc, value, 0)
    }

    fn read_value(&self, dec: &mut Decoder<'_>) -> Result<Value> {
        read_value_impl(dec, 0)
    }
}

fn write_value_impl(enc: &mut Encoder, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match value {
        Value::Null => enc.u8(Tag::Null as u8),
        Value::Void => enc.u8(Tag::Void as u8),
        Value::Bool(true) => enc.u8(Tag::BoolTrue as u8),
        Value::Bool(false) => enc.u8(Tag::BoolFalse as u8),
        Value::I8(v) => { enc.u8(Tag::I8 as u8); enc.u8(*v as u8); },
        Value::I16(v) => { enc.u8(Tag::I16 as u8); enc.i16(*v); },
        Value::I32(v) => { enc.u8(Tag::I32 as u8); enc.i32(*v); },
        Value::I64(v) => { enc.u8(Tag::I64 as u8); enc.i64(*v); },
        Value::F32(v) => { enc.u8(Tag::F32 as u8); enc.f32(*v); },
        Value::F64(v) => { enc.u8(Tag::F64 as u8); enc.f64(*v); },
        Value::Char(v) => { enc.u8(Tag::Char as u8); enc.u32(*v as u32); },
        Value::String(s) => { enc.u8(Tag::String as u8); enc.str(s)?; },
        Value::Bytes(b) => { enc.u8(Tag::Bytes as u8); enc.bytes(b)?; },
        Value::List(items) => {
            enc.u8(Tag::List as u8);
            enc.len_header(items.len())?;
            for item in items {
                write_value_impl(enc, item, depth + 1)?;
            }
        },
        Value::Map(entries) => {
            enc.u8(Tag::Map as u8);
            enc.len_header(entries.len())?;
            for (key, item) in entries {
                enc.str(key)?;
                write_value_impl(enc, item, depth + 1)?;
            }
        },
        Value::Exception(e) => {
            enc.u8(Tag::Exception as u8);
            write_exception(enc, e, depth)?;
        },
        Value::EndpointRef(name) => { enc.u8(Tag::EndpointRef as u8); enc.str(name)?; },
        Value::Callback { id, interfaces } => {
            enc.u8(Tag::Callback as u8);
            enc.str(id)?;
            enc.len_header(interfaces.len())?;
            for name in interfaces {
                enc.str(name)?;
            }
        },
        Value::AsyncRef(id) => { enc.u8(Tag::AsyncRef as u8); enc.u64(*id); },
    }
    Ok(())
}

fn write_exception(enc: &mut Encoder, e: &RemoteException, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }
    enc.str(&e.class)?;
    enc.opt_str(e.message.as_deref())?;
    match &e.cause {
        Some(cause) => {
            enc.bool(true);
            write_exception(enc, cause, depth + 1)
        }
        None => {
            enc.bool(false);
            Ok(())
        }
    }
}

fn read_value_impl(dec: &mut Decoder<'_>, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let byte = dec.u8()?;
    let tag = Tag::from_u8(byte).ok_or(Error::InvalidTag(byte))?;

    let value = match tag {
        Tag::Null => Value::Null,
        Tag::Void => Value::Void,
        Tag::BoolTrue => Value::Bool(true),
        Tag::BoolFalse => Value::Bool(false),
        Tag::I8 => Value::I8(dec.u8()? as i8),
        Tag::I16 => Value::I16(dec.i16()?),
        Tag::I32 => Value::I32(dec.i32()?),
        Tag::I64 => Value::I64(dec.i64()?),
        Tag::F32 => Value::F32(dec.f32()?),
        Tag::F64 => Value::F64(dec.f64()?),
        Tag::Char => Value::Char(char::from_u32(dec.u32()?).ok_or(Error::InvalidUtf8)?),
        Tag::String => Value::String(dec.str()?.to_owned()),
        Tag::Bytes => Value::Bytes(dec.bytes()?.to_vec()),
        Tag::List => {
            let count = dec.len_header()?;
            // Every item takes at least one byte; reject counts the buffer cannot hold.
            if count > dec.remaining() {
                return Err(Error::UnexpectedEnd);
            }
            let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                items.push(read_value_impl(dec, depth + 1)?);
            }
            Value::List(items)
        },
        Tag::Map => {
            let count = dec.len_header()?;
            if count > dec.remaining() {
                return Err(Error::UnexpectedEnd);
            }
            let mut entries = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                let key = dec.str()?.to_owned();
                entries.push((key, read_value_impl(dec, depth + 1)?));
            }
            Value::Map(entries)
        },
        Tag::Exception => Value::Exception(read_exception(dec, depth)?),
        Tag::EndpointRef => Value::EndpointRef(dec.str()?.to_owned()),
        Tag::Callback => {
            let id = dec.str()?.to_owned();
            let count = dec.len_header()?;
            if count > dec.remaining() {
                return Err(Error::UnexpectedEnd);
            }
            let mut interfaces = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                interfaces.push(dec.str()?.to_owned());
            }
            Value::Callback { id, interfaces }
        },
        Tag::AsyncRef => Value::AsyncRef(dec.u64()?),
    };
    Ok(value)
}

fn read_exception(dec: &mut Decoder<'_>, depth: usize) -> Result<RemoteException> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }
    let class = dec.str()?.to_owned();
    let message = dec.opt_str()?.map(str::to_owned);
    let cause = if dec.bool()? {
        Some(Box::new(read_exception(dec, depth + 1)?))
    } else {
        None
    };
    Ok(RemoteException { class, message, cause })
}
