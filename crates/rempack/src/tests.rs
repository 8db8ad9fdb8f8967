use crate::*;

fn pack(value: &Value) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    PackSerializer.write_value(&mut enc, value)?;
    Ok(enc.into_bytes())
}

fn unpack(bytes: &[u8]) -> Result<Value> {
    let mut dec = Decoder::new(bytes);
    let value = PackSerializer.read_value(&mut dec)?;
    dec.finish()?;
    Ok(value)
}

// ============================================================================
//  CURSOR
// ============================================================================

#[test]
fn test_cursor_little_endian_layout() -> Result<()> {
    let mut enc = Encoder::new();
    enc.u32(0x0403_0201);
    enc.i64(-2);
    assert_eq!(&enc.as_bytes()[..4], &[0x01, 0x02, 0x03, 0x04]);

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.u32()?, 0x0403_0201);
    assert_eq!(dec.i64()?, -2);
    dec.finish()
}

#[test]
fn test_bool_bytes_are_strict() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bool(true);
    enc.bool(false);
    assert_eq!(enc.as_bytes(), &[0xFF, 0x00]);

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    assert!(dec.bool()?);
    assert!(!dec.bool()?);

    let mut bad = Decoder::new(&[0x01]);
    assert_eq!(bad.bool(), Err(Error::InvalidBool(0x01)));
    Ok(())
}

#[test]
fn test_strings_and_optional_strings() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("")?;
    enc.str("héllo")?;
    enc.opt_str(None)?;
    enc.opt_str(Some("x"))?;

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str()?, "");
    assert_eq!(dec.str()?, "héllo");
    assert_eq!(dec.opt_str()?, None);
    assert_eq!(dec.opt_str()?, Some("x"));
    dec.finish()
}

#[test]
fn test_invalid_utf8_rejected() {
    let bytes = [2, 0, 0, 0, 0xC3, 0x28];
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str(), Err(Error::InvalidUtf8));
}

#[test]
fn test_blob_backpatches_length() -> Result<()> {
    let mut enc = Encoder::new();
    enc.blob(|enc| {
        enc.u64(7);
        enc.str("abc")
    })?;
    enc.u8(9);

    let bytes = enc.into_bytes();
    assert_eq!(&bytes[..4], &15u32.to_le_bytes());

    let mut dec = Decoder::new(&bytes);
    let mut inner = dec.blob()?;
    assert_eq!(inner.u64()?, 7);
    assert_eq!(inner.str()?, "abc");
    inner.finish()?;
    assert_eq!(dec.u8()?, 9);
    dec.finish()
}

#[test]
fn test_truncated_reads_fail_cleanly() {
    let mut dec = Decoder::new(&[1, 2, 3]);
    assert_eq!(dec.u32(), Err(Error::UnexpectedEnd));

    // A length header that claims more than the buffer holds.
    let mut dec = Decoder::new(&[10, 0, 0, 0, b'a']);
    assert_eq!(dec.bytes(), Err(Error::UnexpectedEnd));
}

#[test]
fn test_finish_reports_trailing_bytes() {
    let dec = Decoder::new(&[0, 0]);
    assert_eq!(dec.finish(), Err(Error::TrailingBytes(2)));
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_null_and_void_stay_distinct() -> Result<()> {
    let null = pack(&Value::Null)?;
    let void = pack(&Value::Void)?;
    assert_ne!(null, void);
    assert_eq!(unpack(&null)?, Value::Null);
    assert_eq!(unpack(&void)?, Value::Void);
    Ok(())
}

#[test]
fn test_nested_value_roundtrip() -> Result<()> {
    let value = Value::Map(vec![
        ("name".into(), Value::from("calc")),
        ("args".into(), Value::List(vec![
            Value::I8(-1),
            Value::I16(i16::MIN),
            Value::I32(42),
            Value::I64(i64::MAX),
            Value::F32(1.5),
            Value::F64(-0.25),
            Value::Char('λ'),
            Value::Bytes(vec![0, 255]),
            Value::Null,
            Value::Bool(true),
        ])),
        ("empty".into(), Value::List(vec![])),
    ]);
    assert_eq!(unpack(&pack(&value)?)?, value);
    Ok(())
}

#[test]
fn test_remote_placeholders_roundtrip() -> Result<()> {
    let values = [
        Value::EndpointRef("calc".into()),
        Value::Callback { id: "cb-1-7f".into(), interfaces: vec!["demo.Listener".into()] },
        Value::AsyncRef(99),
    ];
    for value in values {
        assert_eq!(unpack(&pack(&value)?)?, value);
    }
    Ok(())
}

#[test]
fn test_exception_cause_chain() -> Result<()> {
    let root = RemoteException::bare("io.Closed");
    let e = RemoteException::new("RemoteInvocationError", "boom").with_cause(root.clone());
    let decoded = unpack(&pack(&Value::Exception(e.clone()))?)?;
    let Value::Exception(decoded) = decoded else {
        panic!("Expected exception, got {:?}", decoded);
    };
    assert_eq!(decoded, e);
    assert_eq!(decoded.root_cause(), &root);
    assert_eq!(decoded.to_string(), "RemoteInvocationError: boom (caused by io.Closed)");
    Ok(())
}

#[test]
fn test_unknown_tag_rejected() {
    assert_eq!(unpack(&[0x7E]), Err(Error::InvalidTag(0x7E)));
}

#[test]
fn test_list_count_larger_than_buffer_rejected() {
    // Claims u32::MAX items with no bytes behind it.
    let bytes = [Tag::List as u8, 0xFF, 0xFF, 0xFF, 0xFF];
    assert_eq!(unpack(&bytes), Err(Error::UnexpectedEnd));
}

#[test]
fn test_huge_list_count_fails_on_first_item() {
    // A count the buffer can nominally hold, followed by garbage.
    let count: u32 = 1 << 24;
    let mut bytes = vec![Tag::List as u8];
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes.resize(bytes.len() + count as usize, 0x7E);
    assert_eq!(unpack(&bytes), Err(Error::InvalidTag(0x7E)));
}

#[test]
fn test_huge_map_count_fails_on_first_key() {
    let count: u32 = 1 << 20;
    let mut bytes = vec![Tag::Map as u8];
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes.resize(bytes.len() + count as usize, 0xFF);
    assert_eq!(unpack(&bytes), Err(Error::UnexpectedEnd));
}

#[test]
fn test_depth_limit() {
    let mut value = Value::Null;
    for _ in 0..(MAX_DEPTH + 2) {
        value = Value::List(vec![value]);
    }
    match pack(&value) {
        Err(Error::RecursionLimitExceeded) => {},
        other => panic!("Expected RecursionLimitExceeded, got {:?}", other),
    }
}
