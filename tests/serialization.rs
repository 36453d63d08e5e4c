use elk_core::logger::init_logger_debug;
use elk_core::serialization::{
    DecodeError, Value, deserialise, deserialise_at, serialise,
};

fn round_trip(value: &Value, expected: &[u8]) {
    let encoded = serialise(value);
    assert_eq!(encoded, expected, "encoding mismatch for {value:?}");
    let (decoded, consumed) = deserialise(&encoded).unwrap();
    assert_eq!(&decoded, value);
    assert_eq!(consumed, encoded.len());
}

#[test]
fn simple_values() {
    init_logger_debug();
    round_trip(&Value::from(1), b"\x00\x01\x00\x00\x00");
    round_trip(
        &Value::from(2.5),
        b"\x01\x00\x00\x00\x00\x00\x00\x04\x40",
    );
    round_trip(&Value::from("hello"), b"\x02\x05\x00\x00\x00hello");
    round_trip(&Value::from(-1), b"\x00\xff\xff\xff\xff");
}

#[test]
fn tag_only_values() {
    init_logger_debug();
    round_trip(&Value::Bool(true), b"\x07");
    round_trip(&Value::Bool(false), b"\x08");
    round_trip(&Value::None, b"\x09");
}

#[test]
fn byte_strings() {
    init_logger_debug();
    round_trip(
        &Value::Bytes(vec![0x00, 0xff, 0x10]),
        b"\x06\x03\x00\x00\x00\x00\xff\x10",
    );
}

#[test]
fn sequences() {
    init_logger_debug();
    round_trip(
        &Value::List(vec![
            Value::from(1),
            Value::from(2),
            Value::from(3),
            Value::from("blue"),
        ]),
        b"\x05\x04\x00\x00\x00\x00\x01\x00\x00\x00\x00\x02\x00\x00\x00\x00\x03\x00\x00\x00\x02\x04\x00\x00\x00blue",
    );
    round_trip(
        &Value::Set(vec![Value::from(1), Value::from(2), Value::from(3.5)]),
        b"\x04\x03\x00\x00\x00\x00\x01\x00\x00\x00\x00\x02\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x0c\x40",
    );
    round_trip(
        &Value::Dict(vec![
            (Value::from(1), Value::from(2.5)),
            (Value::from(3.5), Value::from("x")),
            (Value::from("x"), Value::from(2)),
        ]),
        b"\x03\x03\x00\x00\x00\x00\x01\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x04\x40\x01\x00\x00\x00\x00\x00\x00\x0c\x40\x02\x01\x00\x00\x00x\x02\x01\x00\x00\x00x\x00\x02\x00\x00\x00",
    );
}

#[test]
fn nested_structures_round_trip() {
    init_logger_debug();
    let value = Value::Dict(vec![
        (
            Value::from("files"),
            Value::List(vec![Value::from("a.elk"), Value::from("b.elk")]),
        ),
        (
            Value::from("body"),
            Value::Dict(vec![(
                Value::from("consts"),
                Value::List(vec![
                    Value::None,
                    Value::Bool(true),
                    Value::Bytes(vec![1, 2, 3]),
                    Value::Set(vec![Value::from(7)]),
                ]),
            )]),
        ),
    ]);
    let encoded = serialise(&value);
    let (decoded, consumed) = deserialise(&encoded).unwrap();
    assert_eq!(decoded, value);
    assert_eq!(consumed, encoded.len());
}

#[test]
fn sets_compare_regardless_of_order() {
    init_logger_debug();
    let a = Value::Set(vec![Value::from(1), Value::from(2.5)]);
    let b = Value::Set(vec![Value::from(2.5), Value::from(1)]);
    assert_eq!(a, b);
    // still distinct kinds inside
    let c = Value::Set(vec![Value::from(1), Value::from(2)]);
    assert_ne!(a, c);
}

#[test]
fn values_of_different_kinds_are_unequal() {
    init_logger_debug();
    assert_ne!(Value::from(1), Value::from(1.0));
    assert_ne!(Value::from(1), Value::Bool(true));
    assert_ne!(Value::from(0), Value::Bool(false));
    assert_ne!(Value::from("1"), Value::from(1));
    assert_ne!(Value::None, Value::from(0));
}

#[test]
fn consecutive_records_decode_with_offsets() {
    init_logger_debug();
    let mut buffer = serialise(&Value::from("header"));
    let first_len = buffer.len();
    buffer.extend(serialise(&Value::from(42)));

    let (first, next) = deserialise(&buffer).unwrap();
    assert_eq!(first, Value::from("header"));
    assert_eq!(next, first_len);
    let (second, end) = deserialise_at(&buffer, next).unwrap();
    assert_eq!(second, Value::from(42));
    assert_eq!(end, buffer.len());
}

#[test]
fn malformed_input_is_rejected() {
    init_logger_debug();
    assert_eq!(deserialise(b"").unwrap_err(), DecodeError::UnexpectedEof);
    assert_eq!(
        deserialise(b"\x0a").unwrap_err(),
        DecodeError::InvalidTag(0x0a)
    );
    // int payload cut short
    assert_eq!(
        deserialise(b"\x00\x01\x00").unwrap_err(),
        DecodeError::UnexpectedEof
    );
    // string payload shorter than its length field
    assert_eq!(
        deserialise(b"\x02\x05\x00\x00\x00he").unwrap_err(),
        DecodeError::UnexpectedEof
    );
    // invalid UTF-8 in a string payload
    assert_eq!(
        deserialise(b"\x02\x02\x00\x00\x00\xff\xfe").unwrap_err(),
        DecodeError::InvalidUtf8
    );
    // truncated list element
    assert_eq!(
        deserialise(b"\x05\x02\x00\x00\x00\x00\x01\x00\x00\x00").unwrap_err(),
        DecodeError::UnexpectedEof
    );
}
