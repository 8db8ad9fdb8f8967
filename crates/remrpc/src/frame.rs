//! # Message Header
//!
//! `[Type: u8][Seq: u64][Body..]`, Little-Endian.
//!
//! ## Invariants
//! - **Panic Safety**: Peeking helpers never read past the slice; a short buffer
//!   yields `None`.

use rempack::Decoder;
use rempack::Encoder;

use crate::error::Result;
use crate::message::MsgType;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 9;

/// The fixed header preceding every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw type byte; validated against `MsgType` by the codec.
    pub ty: u8,
    pub seq: u64,
}

impl Header {
    pub fn new(ty: MsgType, seq: u64) -> Self {
        Self { ty: ty as u8, seq }
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.u8(self.ty);
        enc.u64(self.seq);
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let ty = dec.u8()?;
        let seq = dec.u64()?;
        Ok(Self { ty, seq })
    }
}

/// Recovers the message kind without decoding the body.
pub fn peek_type(bytes: &[u8]) -> Option<MsgType> {
    bytes.first().copied().and_then(MsgType::from_u8)
}

/// Recovers the sequence id without decoding the body.
///
/// Used to attach the original id to a decode fault.
pub fn peek_seq(bytes: &[u8]) -> Option<u64> {
    let raw = bytes.get(1..HEADER_LEN)?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(raw);
    Some(u64::from_le_bytes(seq))
}
