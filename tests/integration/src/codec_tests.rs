//! Codec Tests - NDR payloads shaped like real DCOM calls
//!
//! - Nested structs with deferred pointers and conformant tails
//! - Interface pointers collected while decoding and handed to a registry
//! - Malformed input rejected without panicking

mod common;

use std::net::IpAddr;
use std::sync::Arc;

use dcom::{InterfacePointer, Ipid, Oid, Oxid, Registry, RegistryConfig, SessionId, SystemClock, TcpConnector};
use dcom_ndr::{
    decode_params, encode_params, size_of, ArrayShape, ArrayValue, Currency, DecodeContext, Flags,
    NdrError, NdrReader, PointerValue, StringKind, TypeDescriptor, Value, IID_IUNKNOWN,
};

use common::*;

fn pointer(n: u64) -> InterfacePointer {
    InterfacePointer::new(
        IID_IUNKNOWN,
        4000 + n as u16,
        Oxid::new(n),
        Oid::new(n * 10),
        Ipid::new(uuid::Uuid::from_u128(n as u128)),
    )
}

/// Reply of a call returning an account record and the objects it owns
fn account_type() -> TypeDescriptor {
    let owners = ArrayShape::new(TypeDescriptor::InterfacePointer, 1)
        .expect("one dimension")
        .conformant();
    TypeDescriptor::structure(vec![
        TypeDescriptor::U32,
        TypeDescriptor::unique(TypeDescriptor::String(StringKind::Wide)),
        TypeDescriptor::Currency,
        TypeDescriptor::array(owners),
    ])
}

fn account_value(pointers: &[InterfacePointer]) -> Value {
    Value::Struct(vec![
        Value::U32(7),
        Value::Pointer(PointerValue::new(Value::string("Zoë"))),
        Value::Currency(Currency::new(-12, 5000)),
        Value::Array(ArrayValue::new(
            pointers.iter().copied().map(Value::InterfacePointer).collect(),
        )),
    ])
}

#[test]
fn test_account_reply_round_trip() {
    init_logging();
    let pointers = [pointer(1), pointer(2)];
    let params = vec![
        (account_type(), account_value(&pointers)),
        (TypeDescriptor::U32, Value::U32(0)),
    ];
    let bytes = encode_params(&params, Flags::NONE).unwrap();
    assert_eq!(bytes.len() % 4, 0);

    let types: Vec<TypeDescriptor> = params.iter().map(|(ty, _)| ty.clone()).collect();
    let mut reader = NdrReader::new(bytes);
    let mut ctx = DecodeContext::new();
    let values = decode_params(&types, &mut reader, Flags::NONE, &mut ctx).unwrap();

    assert_eq!(values[0], account_value(&pointers));
    assert_eq!(values[1], Value::U32(0));
    assert_eq!(ctx.interface_pointers(), &pointers);
}

#[test]
fn test_size_of_agrees_with_encoder() {
    let pointers = [pointer(3)];
    let ty = account_type();
    let value = account_value(&pointers);
    let bytes = encode_params(&[(ty.clone(), value.clone())], Flags::NONE).unwrap();
    assert_eq!(size_of(&ty, &value, Flags::NONE).unwrap(), bytes.len());
}

#[test]
fn test_truncated_reply_is_an_error() {
    let pointers = [pointer(4)];
    let bytes = encode_params(&[(account_type(), account_value(&pointers))], Flags::NONE).unwrap();

    for cut in [1, bytes.len() / 2, bytes.len() - 1] {
        let mut reader = NdrReader::new(bytes.slice(..cut));
        let result = decode_params(&[account_type()], &mut reader, Flags::NONE, &mut DecodeContext::new());
        assert!(result.is_err(), "decode of {cut} bytes succeeded");
    }
}

#[test]
fn test_value_shape_mismatch() {
    let err = encode_params(
        &[(account_type(), Value::Struct(vec![Value::U32(1)]))],
        Flags::NONE,
    )
    .unwrap_err();
    assert!(matches!(err, NdrError::MemberCountMismatch { expected: 4, found: 1 }));
}

#[tokio::test]
async fn test_decoded_pointers_become_imports() {
    init_logging();
    let registry = Registry::new(
        RegistryConfig::default(),
        Arc::new(SystemClock),
        Arc::new(TcpConnector::default()),
    );
    let pointers = [pointer(5), pointer(6)];
    let bytes = encode_params(&[(account_type(), account_value(&pointers))], Flags::NONE).unwrap();

    let mut ctx = DecodeContext::new();
    decode_params(&[account_type()], &mut NdrReader::new(bytes), Flags::NONE, &mut ctx).unwrap();

    let session = SessionId::next();
    let peer: IpAddr = "192.0.2.10".parse().unwrap();
    let imported = registry.import(session, peer, &ctx);
    assert_eq!(imported, pointers);

    for ptr in &pointers {
        let resolver = std::net::SocketAddr::new(peer, ptr.resolver_port);
        let snapshot = registry.ping_set(session, resolver).unwrap();
        assert_eq!(snapshot.oids, vec![ptr.oid]);
        assert_eq!(registry.reference_count(session, &ptr.oid), Some(1));
    }

    registry.clear_references(session);
    assert_eq!(registry.reference_count(session, &pointers[0].oid), None);
}
