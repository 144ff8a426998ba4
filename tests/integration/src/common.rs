//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dcom::{LocalObject, Registry, RegistryConfig, SystemClock, TcpConnector};

/// Install a test subscriber once; `RUST_LOG` controls the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Exportable test object
pub struct Widget {
    pub id: usize,
}

impl LocalObject for Widget {}

pub fn widget(id: usize) -> Arc<Widget> {
    Arc::new(Widget { id })
}

/// Loopback config with intervals short enough for a test run
pub fn fast_config() -> RegistryConfig {
    RegistryConfig::default()
        .with_bind_address(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_ping_interval(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(50))
        .with_expiry_window(Duration::from_millis(400))
        .with_ping_timeout(Duration::from_secs(2))
        .with_sweep_enabled(true)
}

/// Started registry on the system clock and the TCP connector
pub async fn start_registry(config: RegistryConfig) -> Registry {
    let registry = Registry::new(
        config,
        Arc::new(SystemClock),
        Arc::new(TcpConnector::new(Duration::from_secs(2))),
    );
    registry.start().await.expect("registry failed to start");
    registry
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Success/failure tally shared by concurrent workers
#[derive(Default)]
pub struct ConcurrentStats {
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl ConcurrentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}
