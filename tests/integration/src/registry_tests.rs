//! Registry Tests - export/import bookkeeping under concurrency
//!
//! These tests drive one registry from many tasks at once and check that:
//! - Every export gets distinct identifiers
//! - Reference counts stay exact under concurrent add/release
//! - Session teardown is complete and idempotent

mod common;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Barrier;

use dcom::{DcomError, HolderState, ManualClock, Oid, Registry, RegistryConfig, SessionId, TcpConnector};

use common::*;

fn remote(port: u16) -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 1], port))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_exports_get_unique_ids() {
    init_logging();

    const TASKS: usize = 16;
    const EXPORTS_PER_TASK: usize = 50;

    let registry = start_registry(fast_config().with_sweep_enabled(false)).await;
    let barrier = Arc::new(Barrier::new(TASKS));

    let handles = (0..TASKS).map(|task| {
        let registry = registry.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            let session = SessionId::next();
            let mut pointers = Vec::new();
            for n in 0..EXPORTS_PER_TASK {
                pointers.push(registry.export(session, widget(task * 1000 + n)).unwrap());
            }
            pointers
        })
    });
    let pointers: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    let total = TASKS * EXPORTS_PER_TASK;
    assert_eq!(registry.exported_count(), total);
    assert_eq!(pointers.iter().map(|p| p.oid).collect::<HashSet<_>>().len(), total);
    assert_eq!(pointers.iter().map(|p| p.oxid).collect::<HashSet<_>>().len(), total);
    assert_eq!(pointers.iter().map(|p| p.ipid).collect::<HashSet<_>>().len(), total);
    for ptr in &pointers {
        assert_eq!(registry.resolve_by_ipid(&ptr.ipid).unwrap().interface_pointer, *ptr);
    }

    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reference_counting() {
    init_logging();

    const WORKERS: usize = 8;
    const ROUNDS: usize = 200;

    let registry = Registry::new(
        RegistryConfig::default(),
        Arc::new(ManualClock::new()),
        Arc::new(TcpConnector::default()),
    );
    let session = SessionId::next();
    let oid = Oid::new(99);
    // keeps the holder open while workers churn
    registry.add_reference(session, remote(135), oid);

    let stats = Arc::new(ConcurrentStats::new());
    let handles = (0..WORKERS).map(|_| {
        let registry = registry.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            for _ in 0..ROUNDS {
                registry.add_reference(session, remote(135), oid);
                tokio::task::yield_now().await;
                match registry.release_reference(session, oid) {
                    Ok(()) => stats.record_success(),
                    Err(_) => stats.record_failure(),
                }
            }
        })
    });
    for result in join_all(handles).await {
        result.unwrap();
    }

    assert_eq!(stats.failures(), 0);
    assert_eq!(stats.successes(), WORKERS * ROUNDS);
    assert_eq!(registry.reference_count(session, &oid), Some(1));

    registry.release_reference(session, oid).unwrap();
    assert!(registry.ping_set(session, remote(135)).is_none());
}

#[tokio::test]
async fn test_holders_are_per_session_and_remote() {
    let registry = Registry::new(
        RegistryConfig::default(),
        Arc::new(ManualClock::new()),
        Arc::new(TcpConnector::default()),
    );
    let (a, b) = (SessionId::next(), SessionId::next());

    registry.add_reference(a, remote(1), Oid::new(1));
    registry.add_reference(a, remote(2), Oid::new(2));
    registry.add_reference(b, remote(1), Oid::new(1));

    let snapshot = registry.ping_set(a, remote(1)).unwrap();
    assert_eq!(snapshot.state, HolderState::Tracking);
    assert_eq!(snapshot.oids, vec![Oid::new(1)]);
    assert!(snapshot.set_id.is_none());

    registry.release_reference(a, Oid::new(1)).unwrap();
    assert!(registry.ping_set(a, remote(1)).is_none());
    // the other session's holder on the same remote is untouched
    assert_eq!(registry.reference_count(b, &Oid::new(1)), Some(1));
    assert!(matches!(
        registry.release_reference(a, Oid::new(1)),
        Err(DcomError::ReferenceNotFound { .. })
    ));

    registry.clear_references(a);
    registry.clear_references(a);
    assert!(registry.ping_set(a, remote(2)).is_none());
}

#[tokio::test]
async fn test_session_teardown() {
    init_logging();
    let registry = start_registry(fast_config().with_sweep_enabled(false)).await;
    let (doomed, survivor) = (SessionId::next(), SessionId::next());

    let mut signals = Vec::new();
    for n in 0..5 {
        let ptr = registry.export(doomed, widget(n)).unwrap();
        signals.push(registry.interrupt_signal(&ptr.oid).unwrap());
    }
    let kept = registry.export(survivor, widget(100)).unwrap();

    assert_eq!(registry.destroy_session_references(doomed), 5);
    for signal in &mut signals {
        tokio::time::timeout(Duration::from_secs(1), signal.wait_for(|fired| *fired))
            .await
            .expect("interrupt not delivered")
            .unwrap();
    }
    assert_eq!(registry.destroy_session_references(doomed), 0);
    assert_eq!(registry.exported_count(), 1);
    assert!(registry.resolve_by_oxid(&kept.oxid).is_some());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let registry = Registry::new(
        RegistryConfig::default().with_ping_interval(Duration::ZERO),
        Arc::new(ManualClock::new()),
        Arc::new(TcpConnector::default()),
    );
    assert!(matches!(registry.start().await, Err(DcomError::InvalidConfig(_))));
    assert!(!registry.is_running());
    assert!(matches!(
        registry.export(SessionId::next(), widget(1)),
        Err(DcomError::NotRunning)
    ));
    registry.shutdown().await;
}
