// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn decimal_ext_roundtrip() {
    let original = Decimal::from_str("3.50").unwrap();
    let value = decimal_value(original);
    assert!(matches!(value, Value::Ext(EXT_DECIMAL, _)));
    assert_eq!(decimal_from_value(&value).unwrap(), original);
}

#[test]
fn decimal_ext_is_utf8_literal() {
    let value = decimal_value(Decimal::from_str("2.5").unwrap());
    let Value::Ext(_, bytes) = &value else {
        panic!("not an ext value");
    };
    assert_eq!(std::str::from_utf8(bytes).unwrap(), "2.5");
}

#[test]
fn uuid_ext_is_sixteen_raw_bytes() {
    let id = Uuid::new_v4();
    let value = uuid_value(id);
    let Value::Ext(kind, bytes) = &value else {
        panic!("not an ext value");
    };
    assert_eq!(*kind, EXT_UUID);
    assert_eq!(bytes.len(), 16);
    assert_eq!(uuid_from_value(&value).unwrap(), id);
}

#[test]
fn enum_ext_roundtrip() {
    let value = enum_value("KernelStatus", "RUNNING").unwrap();
    let (name, variant) = enum_from_value(&value).unwrap();
    assert_eq!(name, "KernelStatus");
    assert_eq!(variant, "RUNNING");
}

#[test]
fn mismatched_ext_type_is_rejected() {
    let value = uuid_value(Uuid::new_v4());
    assert!(matches!(
        decimal_from_value(&value),
        Err(WireError::MalformedExt(EXT_DECIMAL))
    ));
}

#[test]
fn message_roundtrip() {
    let msg = RpcMessage::Call {
        call_id: 7,
        method: "create_kernel".to_string(),
        args: vec![Value::from("k-1")],
        kwargs: BTreeMap::new(),
    };
    let bytes = encode(&msg).unwrap();
    let decoded: RpcMessage = decode(&bytes).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn reply_with_error_record() {
    let msg = RpcMessage::Reply {
        call_id: 7,
        result: None,
        error: Some(ErrorRecord {
            exc_name: "KernelCreationFailed".to_string(),
            exc_repr: "KernelCreationFailed('timeout')".to_string(),
            exc_args: vec!["timeout".to_string()],
            exc_tb: Some("stage: image-pull".to_string()),
        }),
    };
    let bytes = encode(&msg).unwrap();
    let decoded: RpcMessage = decode(&bytes).unwrap();
    assert_eq!(decoded, msg);
}

#[tokio::test]
async fn frame_roundtrip() {
    let payload = b"hello".to_vec();
    let mut buf = Vec::new();
    write_frame(&mut buf, &payload).await.unwrap();
    assert_eq!(&buf[..4], &5u32.to_be_bytes());

    let mut cursor = std::io::Cursor::new(buf);
    let read = read_frame(&mut cursor).await.unwrap();
    assert_eq!(read, payload);
}

#[tokio::test]
async fn truncated_frame_reports_closed() {
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    assert!(matches!(
        read_frame(&mut cursor).await,
        Err(WireError::ConnectionClosed)
    ));
}
