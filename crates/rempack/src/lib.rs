//! # Rempack
//!
//! A small, bounded binary cursor and the value model that crosses the wire
//! during a remote invocation.
//!
//! ## Philosophy
//!
//! - **Explicit State**: The `Encoder` owns one growable buffer. Length headers are
//!   back-patched, never guessed.
//! - **Bounded**: `Decoder` is a zero-copy, bounds-checked view. Every read either
//!   succeeds completely or returns an error without panicking.
//! - **Pluggable Payloads**: Message fields use the raw cursor. Application values
//!   go through an `ObjectSerializer`, of which `PackSerializer` is the default.
//!
//! ## Format
//!
//! - **Integers / Floats**: fixed width, Little-Endian.
//! - **Booleans**: one byte, `0xFF` for true and `0x00` for false. Anything else is rejected.
//! - **Blobs**: `[Len: u32][Data: Len]` (strings are UTF-8 blobs).

mod serializer;
mod value;

#[cfg(test)]
mod tests;

pub use serializer::ObjectSerializer;
pub use serializer::PackSerializer;
pub use serializer::Tag;
pub use serializer::MAX_DEPTH;
pub use serializer::MAX_PREALLOC;
pub use value::RemoteException;
pub use value::Value;

/// Rempack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Byte does not correspond to a valid value `Tag`.
    InvalidTag(u8),
    /// String data is not valid UTF-8, or a char is not a scalar value.
    InvalidUtf8,
    /// A boolean byte was neither `0xFF` nor `0x00`.
    InvalidBool(u8),
    /// Blob length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// A bounded view still held unread bytes when it was finished.
    TrailingBytes(usize),
    /// The nested depth of a value exceeded `MAX_DEPTH`.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of buffer"),
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "invalid utf-8"),
            Error::InvalidBool(b) => write!(f, "invalid boolean byte: {:#04x}", b),
            Error::BlobTooLarge(n) => write!(f, "blob of {} bytes exceeds u32 length", n),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes left unread", n),
            Error::RecursionLimitExceeded => write!(f, "value nesting exceeds {} levels", MAX_DEPTH),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Rempack operations.
pub type Result<T> = std::result::Result<T, Error>;

const TRUE: u8 = 0xFF;
const FALSE: u8 = 0x00;

/// A growable, append-only encoder.
///
/// Fixed-width writes cannot fail. Blob writes fail only when the length does
/// not fit the `u32` header.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a view of the current buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) { self.buf.push(v); }
    pub fn bool(&mut self, v: bool) { self.buf.push(if v { TRUE } else { FALSE }); }
    pub fn u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn i16(&mut self, v: i16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn i32(&mut self, v: i32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn u64(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn i64(&mut self, v: i64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn f32(&mut self, v: f32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn f64(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Encodes a `u32` length header.
    ///
    /// # Errors
    /// Returns `Error::BlobTooLarge` if `len` does not fit in a `u32`.
    pub fn len_header(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        self.u32(len);
        Ok(())
    }

    /// Encodes a length-prefixed UTF-8 string.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.len_header(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Encodes a length-prefixed byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.len_header(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Encodes an optional string as a presence flag followed by the string.
    pub fn opt_str(&mut self, v: Option<&str>) -> Result<()> {
        match v {
            Some(s) => {
                self.bool(true);
                self.str(s)
            }
            None => {
                self.bool(false);
                Ok(())
            }
        }
    }

    /// Encodes a length-prefixed blob whose body is produced by `body`.
    ///
    /// The length header is written as a placeholder and patched once `body`
    /// returns, so the blob is self-delimiting regardless of what `body` writes.
    pub fn blob<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut Encoder) -> Result<()>,
    {
        let len_pos = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0, 0]); // Length placeholder
        let start = self.buf.len();

        body(self)?;

        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[len_pos..start].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the internal cursor. `take` returns a new `Decoder`
/// restricted to a sub-range, which `finish` verifies was consumed fully.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Checks that the view was consumed completely.
    pub fn finish(&self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingBytes(self.buf.len()))
        }
    }

    /// Peeks the next byte without advancing.
    pub fn peek_u8(&self) -> Result<u8> {
        self.buf.first().copied().ok_or(Error::UnexpectedEnd)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Splits off the next `n` bytes as an independent view.
    pub fn take(&mut self, n: usize) -> Result<Decoder<'a>> {
        Ok(Decoder::new(self.read_bytes(n)?))
    }

    pub fn u8(&mut self) -> Result<u8> { Ok(self.read_array::<1>()?[0]) }
    pub fn u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.read_array()?)) }
    pub fn i16(&mut self) -> Result<i16> { Ok(i16::from_le_bytes(self.read_array()?)) }
    pub fn u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.read_array()?)) }
    pub fn i32(&mut self) -> Result<i32> { Ok(i32::from_le_bytes(self.read_array()?)) }
    pub fn u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.read_array()?)) }
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.read_array()?)) }
    pub fn f32(&mut self) -> Result<f32> { Ok(f32::from_le_bytes(self.read_array()?)) }
    pub fn f64(&mut self) -> Result<f64> { Ok(f64::from_le_bytes(self.read_array()?)) }

    /// Decodes a boolean; only `0xFF` and `0x00` are accepted.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            TRUE => Ok(true),
            FALSE => Ok(false),
            other => Err(Error::InvalidBool(other)),
        }
    }

    /// Decodes a `u32` length header.
    pub fn len_header(&mut self) -> Result<usize> {
        Ok(self.u32()? as usize)
    }

    /// Decodes a length-prefixed string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        let len = self.len_header()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a length-prefixed byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.len_header()?;
        self.read_bytes(len)
    }

    /// Decodes an optional string written by `Encoder::opt_str`.
    pub fn opt_str(&mut self) -> Result<Option<&'a str>> {
        if self.bool()? { Ok(Some(self.str()?)) } else { Ok(None) }
    }

    /// Decodes a length-prefixed blob as an independent view.
    pub fn blob(&mut self) -> Result<Decoder<'a>> {
        let len = self.len_header()?;
        self.take(len)
    }
}
