//! # Codec
//!
//! The translation layer between `Message` and bytes.
//!
//! ## Invariants
//! - **Registry, not switch**: each kind owns a `BodyCodec` (an encode/decode
//!   pair). Adding a kind means registering one more pair.
//! - **Opaque payloads**: argument, return and exception values are written by
//!   the `ObjectSerializer` inside a length-prefixed blob, and the blob must be
//!   read fully or the message is rejected.
//! - **Total decode**: `Codec::decode` never fails outward. Any fault becomes a
//!   `Message::Error` with `decode_error` set and the original sequence id when
//!   the header was readable.

use std::collections::HashMap;
use std::sync::Arc;

use rempack::Decoder;
use rempack::Encoder;
use rempack::ObjectSerializer;
use rempack::PackSerializer;
use rempack::RemoteException;
use rempack::Value;

use crate::error::Error;
use crate::error::Result;
use crate::frame;
use crate::frame::Header;
use crate::message::Message;
use crate::message::MsgType;

/// Writes the body of one message kind.
pub type EncodeFn = fn(&Message, &mut Encoder, &dyn ObjectSerializer) -> Result<()>;
/// Reads the body of one message kind, given the sequence id from the header.
pub type DecodeFn = fn(u64, &mut Decoder<'_>, &dyn ObjectSerializer) -> Result<Message>;

/// The field layout of one message kind.
#[derive(Clone, Copy)]
pub struct BodyCodec {
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

impl BodyCodec {
    pub const fn new(encode: EncodeFn, decode: DecodeFn) -> Self {
        Self { encode, decode }
    }
}

/// Encodes and decodes messages through a registry of per-kind body codecs.
pub struct Codec {
    bodies: HashMap<MsgType, BodyCodec>,
    serializer: Arc<dyn ObjectSerializer>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// A codec with every standard kind registered and the default serializer.
    pub fn new() -> Self {
        Self::with_serializer(Arc::new(PackSerializer))
    }

    /// A codec with every standard kind registered and a custom serializer.
    pub fn with_serializer(serializer: Arc<dyn ObjectSerializer>) -> Self {
        let bodies = standard_bodies().into_iter().collect();
        Self { bodies, serializer }
    }

    /// Installs the body codec for `ty`, returning the one it replaces.
    pub fn register(&mut self, ty: MsgType, body: BodyCodec) -> Option<BodyCodec> {
        self.bodies.insert(ty, body)
    }

    pub fn serializer(&self) -> &dyn ObjectSerializer {
        self.serializer.as_ref()
    }

    /// Encodes a message into a standalone buffer.
    pub fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        let ty = msg.msg_type();
        let body = self.bodies.get(&ty).ok_or(Error::Unregistered(ty))?;

        let mut enc = Encoder::new();
        Header::new(ty, msg.seq()).encode(&mut enc);
        (body.encode)(msg, &mut enc, self.serializer.as_ref())?;
        Ok(enc.into_bytes())
    }

    /// Decodes a message, surfacing the fault.
    pub fn try_decode(&self, bytes: &[u8]) -> Result<Message> {
        let mut dec = Decoder::new(bytes);
        let header = Header::decode(&mut dec)?;
        let ty = MsgType::from_u8(header.ty).ok_or(Error::UnknownType(header.ty))?;
        let body = self.bodies.get(&ty).ok_or(Error::Unregistered(ty))?;

        let msg = (body.decode)(header.seq, &mut dec, self.serializer.as_ref())?;
        dec.finish()?;
        Ok(msg)
    }

    /// Decodes a message. A fault is converted into a synthetic `Message::Error`.
    pub fn decode(&self, bytes: &[u8]) -> Message {
        match self.try_decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                let seq = frame::peek_seq(bytes).unwrap_or(0);
                let kind = match frame::peek_type(bytes) {
                    Some(ty) => format!("{:?}", ty),
                    None => "unknown".to_owned(),
                };
                tracing::debug!(seq, kind = %kind, error = %e, "decode fault");
                Message::decode_fault(seq, format!("failed to decode {} message: {}", kind, e))
            }
        }
    }
}

fn standard_bodies() -> [(MsgType, BodyCodec); 23] {
    [
        (MsgType::NameLookup, BodyCodec::new(enc_name_lookup, dec_name_lookup)),
        (MsgType::NameLookupReturn, BodyCodec::new(enc_name_lookup_return, dec_name_lookup_return)),
        (MsgType::InterfaceLookup, BodyCodec::new(enc_interface_lookup, dec_interface_lookup)),
        (MsgType::InterfaceLookupReturn, BodyCodec::new(enc_interface_lookup_return, dec_interface_lookup_return)),
        (MsgType::Invoke, BodyCodec::new(enc_invoke, dec_invoke)),
        (MsgType::InvokeReturn, BodyCodec::new(enc_invoke_return, dec_invoke_return)),
        (MsgType::ToString, BodyCodec::new(enc_to_string, dec_to_string)),
        (MsgType::ToStringReturn, BodyCodec::new(enc_to_string_return, dec_to_string_return)),
        (MsgType::Equals, BodyCodec::new(enc_equals, dec_equals)),
        (MsgType::EqualsReturn, BodyCodec::new(enc_equals_return, dec_equals_return)),
        (MsgType::HashCode, BodyCodec::new(enc_hash_code, dec_hash_code)),
        (MsgType::HashCodeReturn, BodyCodec::new(enc_hash_code_return, dec_hash_code_return)),
        (MsgType::OpenRawChannel, BodyCodec::new(enc_open_raw, dec_open_raw)),
        (MsgType::OpenRawChannelReturn, BodyCodec::new(enc_open_raw_return, dec_open_raw_return)),
        (MsgType::CloseRawChannel, BodyCodec::new(enc_close_raw, dec_close_raw)),
        (MsgType::CloseRawChannelReturn, BodyCodec::new(enc_close_raw_return, dec_close_raw_return)),
        (MsgType::RawChannelData, BodyCodec::new(enc_raw_data, dec_raw_data)),
        (MsgType::RawChannelDataReturn, BodyCodec::new(enc_raw_data_return, dec_raw_data_return)),
        (MsgType::Ping, BodyCodec::new(enc_empty, dec_ping)),
        (MsgType::Pong, BodyCodec::new(enc_empty, dec_pong)),
        (MsgType::Error, BodyCodec::new(enc_error, dec_error)),
        (MsgType::ReleaseRef, BodyCodec::new(enc_release_ref, dec_release_ref)),
        (MsgType::AsyncFinished, BodyCodec::new(enc_async_finished, dec_async_finished)),
    ]
}

// ============================================================================
//  FIELD HELPERS
// ============================================================================

fn mismatch(expected: MsgType, msg: &Message) -> Error {
    Error::ProtocolViolation(format!(
        "body codec for {:?} handed a {:?} message",
        expected,
        msg.msg_type()
    ))
}

fn write_value(enc: &mut Encoder, ser: &dyn ObjectSerializer, value: &Value) -> Result<()> {
    enc.blob(|enc| ser.write_value(enc, value))?;
    Ok(())
}

fn read_value(dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Value> {
    let mut blob = dec.blob()?;
    let value = ser.read_value(&mut blob)?;
    blob.finish()?;
    Ok(value)
}

fn write_opt_exception(enc: &mut Encoder, ser: &dyn ObjectSerializer, e: Option<&RemoteException>) -> Result<()> {
    match e {
        Some(e) => {
            enc.bool(true);
            write_value(enc, ser, &Value::Exception(e.clone()))
        }
        None => {
            enc.bool(false);
            Ok(())
        }
    }
}

fn read_opt_exception(dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Option<RemoteException>> {
    if !dec.bool()? {
        return Ok(None);
    }
    match read_value(dec, ser)? {
        Value::Exception(e) => Ok(Some(e)),
        other => Err(Error::ProtocolViolation(format!("expected exception, found {}", other.kind()))),
    }
}

fn write_strings(enc: &mut Encoder, items: &[String]) -> Result<()> {
    enc.len_header(items.len())?;
    for item in items {
        enc.str(item)?;
    }
    Ok(())
}

fn read_strings(dec: &mut Decoder<'_>) -> Result<Vec<String>> {
    let count = dec.len_header()?;
    // Each string carries at least its 4-byte length header.
    if count > dec.remaining() / 4 {
        return Err(Error::Pack(rempack::Error::UnexpectedEnd));
    }
    let mut items = Vec::with_capacity(count.min(rempack::MAX_PREALLOC));
    for _ in 0..count {
        items.push(dec.str()?.to_owned());
    }
    Ok(items)
}

fn read_string(dec: &mut Decoder<'_>) -> Result<String> {
    Ok(dec.str()?.to_owned())
}

fn read_opt_string(dec: &mut Decoder<'_>) -> Result<Option<String>> {
    Ok(dec.opt_str()?.map(str::to_owned))
}

// ============================================================================
//  LOOKUPS
// ============================================================================

fn enc_name_lookup(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::NameLookup { name, .. } = msg else { return Err(mismatch(MsgType::NameLookup, msg)) };
    enc.str(name)?;
    Ok(())
}

fn dec_name_lookup(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::NameLookup { seq, name: read_string(dec)? })
}

fn enc_name_lookup_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::NameLookupReturn { interfaces, error, .. } = msg else {
        return Err(mismatch(MsgType::NameLookupReturn, msg));
    };
    write_strings(enc, interfaces)?;
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_name_lookup_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let interfaces = read_strings(dec)?;
    let error = read_opt_string(dec)?;
    Ok(Message::NameLookupReturn { seq, interfaces, error })
}

fn enc_interface_lookup(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::InterfaceLookup { interface, .. } = msg else {
        return Err(mismatch(MsgType::InterfaceLookup, msg));
    };
    enc.str(interface)?;
    Ok(())
}

fn dec_interface_lookup(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::InterfaceLookup { seq, interface: read_string(dec)? })
}

fn enc_interface_lookup_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::InterfaceLookupReturn { name, interfaces, error, .. } = msg else {
        return Err(mismatch(MsgType::InterfaceLookupReturn, msg));
    };
    enc.str(name)?;
    write_strings(enc, interfaces)?;
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_interface_lookup_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let name = read_string(dec)?;
    let interfaces = read_strings(dec)?;
    let error = read_opt_string(dec)?;
    Ok(Message::InterfaceLookupReturn { seq, name, interfaces, error })
}

// ============================================================================
//  INVOCATION
// ============================================================================

fn enc_invoke(msg: &Message, enc: &mut Encoder, ser: &dyn ObjectSerializer) -> Result<()> {
    let Message::Invoke { object, method, args, .. } = msg else {
        return Err(mismatch(MsgType::Invoke, msg));
    };
    enc.str(object)?;
    enc.u64(*method);
    enc.len_header(args.len())?;
    for arg in args {
        write_value(enc, ser, arg)?;
    }
    Ok(())
}

fn dec_invoke(seq: u64, dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Message> {
    let object = read_string(dec)?;
    let method = dec.u64()?;
    let count = dec.len_header()?;
    // Each argument blob carries at least its 4-byte length header.
    if count > dec.remaining() / 4 {
        return Err(Error::Pack(rempack::Error::UnexpectedEnd));
    }
    let mut args = Vec::with_capacity(count.min(rempack::MAX_PREALLOC));
    for _ in 0..count {
        args.push(read_value(dec, ser)?);
    }
    Ok(Message::Invoke { seq, object, method, args })
}

fn enc_invoke_return(msg: &Message, enc: &mut Encoder, ser: &dyn ObjectSerializer) -> Result<()> {
    let Message::InvokeReturn { value, .. } = msg else {
        return Err(mismatch(MsgType::InvokeReturn, msg));
    };
    write_value(enc, ser, value)
}

fn dec_invoke_return(seq: u64, dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::InvokeReturn { seq, value: read_value(dec, ser)? })
}

fn enc_to_string(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::ToString { object, .. } = msg else { return Err(mismatch(MsgType::ToString, msg)) };
    enc.str(object)?;
    Ok(())
}

fn dec_to_string(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::ToString { seq, object: read_string(dec)? })
}

fn enc_to_string_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::ToStringReturn { value, error, .. } = msg else {
        return Err(mismatch(MsgType::ToStringReturn, msg));
    };
    enc.str(value)?;
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_to_string_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let value = read_string(dec)?;
    let error = read_opt_string(dec)?;
    Ok(Message::ToStringReturn { seq, value, error })
}

fn enc_equals(msg: &Message, enc: &mut Encoder, ser: &dyn ObjectSerializer) -> Result<()> {
    let Message::Equals { object, other, .. } = msg else { return Err(mismatch(MsgType::Equals, msg)) };
    enc.str(object)?;
    write_value(enc, ser, other)
}

fn dec_equals(seq: u64, dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Message> {
    let object = read_string(dec)?;
    let other = read_value(dec, ser)?;
    Ok(Message::Equals { seq, object, other })
}

fn enc_equals_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::EqualsReturn { value, error, .. } = msg else {
        return Err(mismatch(MsgType::EqualsReturn, msg));
    };
    enc.bool(*value);
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_equals_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let value = dec.bool()?;
    let error = read_opt_string(dec)?;
    Ok(Message::EqualsReturn { seq, value, error })
}

fn enc_hash_code(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::HashCode { object, .. } = msg else { return Err(mismatch(MsgType::HashCode, msg)) };
    enc.str(object)?;
    Ok(())
}

fn dec_hash_code(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::HashCode { seq, object: read_string(dec)? })
}

fn enc_hash_code_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::HashCodeReturn { value, error, .. } = msg else {
        return Err(mismatch(MsgType::HashCodeReturn, msg));
    };
    enc.i32(*value);
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_hash_code_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let value = dec.i32()?;
    let error = read_opt_string(dec)?;
    Ok(Message::HashCodeReturn { seq, value, error })
}

// ============================================================================
//  RAW CHANNELS
// ============================================================================

fn enc_open_raw(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::OpenRawChannel { token, .. } = msg else {
        return Err(mismatch(MsgType::OpenRawChannel, msg));
    };
    enc.u32(*token);
    Ok(())
}

fn dec_open_raw(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::OpenRawChannel { seq, token: dec.u32()? })
}

fn enc_open_raw_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::OpenRawChannelReturn { accepted, .. } = msg else {
        return Err(mismatch(MsgType::OpenRawChannelReturn, msg));
    };
    enc.bool(*accepted);
    Ok(())
}

fn dec_open_raw_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::OpenRawChannelReturn { seq, accepted: dec.bool()? })
}

fn enc_close_raw(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::CloseRawChannel { token, .. } = msg else {
        return Err(mismatch(MsgType::CloseRawChannel, msg));
    };
    enc.u32(*token);
    Ok(())
}

fn dec_close_raw(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::CloseRawChannel { seq, token: dec.u32()? })
}

fn enc_close_raw_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::CloseRawChannelReturn { closed, error, .. } = msg else {
        return Err(mismatch(MsgType::CloseRawChannelReturn, msg));
    };
    enc.bool(*closed);
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_close_raw_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let closed = dec.bool()?;
    let error = read_opt_string(dec)?;
    Ok(Message::CloseRawChannelReturn { seq, closed, error })
}

fn enc_raw_data(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::RawChannelData { token, data, .. } = msg else {
        return Err(mismatch(MsgType::RawChannelData, msg));
    };
    enc.u32(*token);
    enc.bytes(data)?;
    Ok(())
}

fn dec_raw_data(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    let token = dec.u32()?;
    let data = dec.bytes()?.to_vec();
    Ok(Message::RawChannelData { seq, token, data })
}

fn enc_raw_data_return(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::RawChannelDataReturn { error, .. } = msg else {
        return Err(mismatch(MsgType::RawChannelDataReturn, msg));
    };
    enc.opt_str(error.as_deref())?;
    Ok(())
}

fn dec_raw_data_return(seq: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::RawChannelDataReturn { seq, error: read_opt_string(dec)? })
}

// ============================================================================
//  CONTROL
// ============================================================================

fn enc_empty(_: &Message, _: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    Ok(())
}

fn dec_ping(_: u64, _: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::Ping)
}

fn dec_pong(_: u64, _: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::Pong)
}

fn enc_error(msg: &Message, enc: &mut Encoder, ser: &dyn ObjectSerializer) -> Result<()> {
    let Message::Error { object, message, cause, decode_error, .. } = msg else {
        return Err(mismatch(MsgType::Error, msg));
    };
    enc.opt_str(object.as_deref())?;
    enc.str(message)?;
    write_opt_exception(enc, ser, cause.as_ref())?;
    enc.bool(*decode_error);
    Ok(())
}

fn dec_error(seq: u64, dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Message> {
    let object = read_opt_string(dec)?;
    let message = read_string(dec)?;
    let cause = read_opt_exception(dec, ser)?;
    let decode_error = dec.bool()?;
    Ok(Message::Error { seq, object, message, cause, decode_error })
}

fn enc_release_ref(msg: &Message, enc: &mut Encoder, _: &dyn ObjectSerializer) -> Result<()> {
    let Message::ReleaseRef { id } = msg else { return Err(mismatch(MsgType::ReleaseRef, msg)) };
    enc.str(id)?;
    Ok(())
}

fn dec_release_ref(_: u64, dec: &mut Decoder<'_>, _: &dyn ObjectSerializer) -> Result<Message> {
    Ok(Message::ReleaseRef { id: read_string(dec)? })
}

fn enc_async_finished(msg: &Message, enc: &mut Encoder, ser: &dyn ObjectSerializer) -> Result<()> {
    let Message::AsyncFinished { value, thrown, .. } = msg else {
        return Err(mismatch(MsgType::AsyncFinished, msg));
    };
    write_opt_exception(enc, ser, thrown.as_ref())?;
    write_value(enc, ser, value)
}

fn dec_async_finished(id: u64, dec: &mut Decoder<'_>, ser: &dyn ObjectSerializer) -> Result<Message> {
    let thrown = read_opt_exception(dec, ser)?;
    let value = read_value(dec, ser)?;
    Ok(Message::AsyncFinished { id, value, thrown })
}
