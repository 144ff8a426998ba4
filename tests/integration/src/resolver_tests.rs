//! Resolver Tests - two registries pinging each other over loopback TCP
//!
//! These tests run the periodic tasks for real:
//! - A pinged export outlives its expiry window
//! - Releasing the last import lets the exporter sweep the object
//! - A dead remote does not break pings to live ones
//! - The listener answers the raw wire protocol, including unknown opnums

mod common;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;

use dcom::oxid_resolver::{opnum, ComplexPingRequest, Frame, StatusReply};
use dcom::types::status;
use dcom::{Oid, ResolverConnection, ResolverConnector, SessionId, SetId, TcpConnector};
use dcom_ndr::{encode_params, DecodeContext, Flags, TypeDescriptor, Value};

use common::*;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pinged_export_stays_alive_until_released() {
    init_logging();
    let exporter = start_registry(fast_config()).await;
    let importer = start_registry(fast_config()).await;
    let window = exporter.config().expiry_window;

    let ptr = exporter.export(SessionId::next(), widget(1)).unwrap();
    let mut interrupted = exporter.interrupt_signal(&ptr.oid).unwrap();

    // the pointer travels in a reply payload
    let reply = encode_params(
        &[(TypeDescriptor::InterfacePointer, Value::InterfacePointer(ptr))],
        Flags::NONE,
    )
    .unwrap();
    let mut ctx = DecodeContext::new();
    dcom_ndr::decode_params(
        &[TypeDescriptor::InterfacePointer],
        &mut dcom_ndr::NdrReader::new(reply),
        Flags::NONE,
        &mut ctx,
    )
    .unwrap();
    let session = SessionId::next();
    importer.import(session, LOCALHOST, &ctx);

    let resolver = SocketAddr::new(LOCALHOST, ptr.resolver_port);
    assert_eq!(Some(resolver), exporter.resolver_addr());
    assert!(
        wait_until(Duration::from_secs(2), || {
            importer
                .ping_set(session, resolver)
                .is_some_and(|s| !s.set_id.is_none())
        })
        .await,
        "importer never got a set id"
    );

    tokio::time::sleep(window * 3).await;
    assert!(exporter.resolve_by_oid(&ptr.oid).is_some(), "pinged export was swept");
    assert!(!*interrupted.borrow());

    importer.release_reference(session, ptr.oid).unwrap();
    tokio::time::timeout(window * 5, interrupted.wait_for(|fired| *fired))
        .await
        .expect("export never expired")
        .unwrap();
    assert!(exporter.resolve_by_oid(&ptr.oid).is_none());

    importer.shutdown().await;
    exporter.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dead_remote_does_not_block_live_one() {
    init_logging();
    let exporter = start_registry(fast_config()).await;
    let importer = start_registry(fast_config()).await;

    let ptr = exporter.export(SessionId::next(), widget(1)).unwrap();
    let live = exporter.resolver_addr().unwrap();

    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let session = SessionId::next();
    importer.add_reference(session, dead, Oid::new(1));
    importer.add_reference(session, live, ptr.oid);

    assert!(
        wait_until(Duration::from_secs(2), || {
            importer.ping_set(session, live).is_some_and(|s| !s.set_id.is_none())
        })
        .await
    );
    let stuck = importer.ping_set(session, dead).unwrap();
    assert!(stuck.set_id.is_none());
    assert_eq!(stuck.oids, vec![Oid::new(1)]);

    importer.shutdown().await;
    exporter.shutdown().await;
}

#[tokio::test]
async fn test_listener_wire_protocol() {
    init_logging();
    let exporter = start_registry(fast_config().with_sweep_enabled(false)).await;
    let addr = exporter.resolver_addr().unwrap();
    let ptr = exporter.export(SessionId::next(), widget(1)).unwrap();

    let connection = TcpConnector::default().connect(addr).await.unwrap();
    assert!(connection.server_alive().await.unwrap());
    assert_eq!(
        connection.simple_ping(SetId::new(0xdead)).await.unwrap(),
        status::OR_INVALID_SET
    );

    let created = connection
        .complex_ping(ComplexPingRequest::new(SetId::NONE, 0, vec![ptr.oid], vec![]))
        .await
        .unwrap();
    assert_eq!(created.status, status::OK);
    assert!(!created.set_id.is_none());
    assert_eq!(connection.simple_ping(created.set_id).await.unwrap(), status::OK);

    let mut raw = TcpStream::connect(addr).await.unwrap();
    Frame::new(42, Bytes::new()).write(&mut raw).await.unwrap();
    let reply = Frame::read(&mut raw, 1024).await.unwrap().unwrap();
    assert_eq!(reply.opnum, 42);
    assert_eq!(
        StatusReply::decode(reply.payload).unwrap().status,
        status::RPC_S_PROCNUM_OUT_OF_RANGE
    );

    // garbage in a known opnum closes only that connection
    Frame::new(opnum::COMPLEX_PING, Bytes::from_static(&[1, 2, 3]))
        .write(&mut raw)
        .await
        .unwrap();
    assert!(matches!(Frame::read(&mut raw, 1024).await, Ok(None) | Err(_)));
    assert!(connection.server_alive().await.unwrap());

    exporter.shutdown().await;
    assert!(TcpConnector::new(Duration::from_secs(1)).connect(addr).await.is_err());
}
