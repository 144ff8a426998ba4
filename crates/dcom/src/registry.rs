//! Reference registry
//!
//! Owns every export and import table of the process. State is split into
//! three lock groups, always taken in this order when more than one is
//! needed:
//!
//! 1. exports: OXID/OID/IPID indexes, per-session export lists, inbound sets
//! 2. ping sets: session -> remote -> [`PingSetHolder`](crate::importer)
//! 3. connections: remote resolver address -> cached connection
//!
//! No lock is held across an `.await`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dcom_ndr::DecodeContext;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RegistryConfig;
use crate::exporter::{ExportTables, ExportedObject, ExportedObjectEntry, LocalObject};
use crate::importer::{PendingPing, PingKind, PingOutcome, PingSetSnapshot, PingSets};
use crate::oxid_resolver::{
    ComplexPingReply, ComplexPingRequest, PingHandler, ResolverConnection, ResolverConnector,
    ResolverListener,
};
use crate::types::{
    status, DcomError, InterfacePointer, Ipid, Oid, Oxid, Result, SessionId, SetId,
};

type ConnectionCache = HashMap<SocketAddr, Arc<dyn ResolverConnection>>;

/// Process-wide registry of exported and imported object references.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    connector: Arc<dyn ResolverConnector>,
    exports: Arc<RwLock<ExportTables>>,
    ping_sets: Mutex<PingSets>,
    connections: Mutex<ConnectionCache>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
    resolver_addr: RwLock<Option<SocketAddr>>,
}

struct Runtime {
    listener: ResolverListener,
    stop: watch::Sender<bool>,
}

/// Inbound ping handling for the listener. Holds only the export tables so
/// the listener does not keep the registry alive.
struct InboundPings {
    exports: Arc<RwLock<ExportTables>>,
    clock: Arc<dyn Clock>,
}

impl PingHandler for InboundPings {
    fn simple_ping(&self, set_id: SetId) -> u32 {
        self.exports.write().simple_ping(set_id, self.clock.now())
    }

    fn complex_ping(&self, request: &ComplexPingRequest) -> ComplexPingReply {
        self.exports.write().complex_ping(request, self.clock.now())
    }
}

impl Registry {
    /// Build an idle registry. Nothing runs until [`Registry::start`].
    pub fn new(
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
        connector: Arc<dyn ResolverConnector>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                clock,
                connector,
                exports: Arc::new(RwLock::new(ExportTables::default())),
                ping_sets: Mutex::new(PingSets::default()),
                connections: Mutex::new(HashMap::new()),
                runtime: tokio::sync::Mutex::new(None),
                resolver_addr: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Bind the resolver listener and start the periodic tasks.
    ///
    /// Returns the listener address. Calling it again while running returns
    /// the same address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut runtime = self.inner.runtime.lock().await;
        if let Some(running) = runtime.as_ref() {
            return Ok(running.listener.local_addr());
        }
        self.inner.config.validate()?;

        let handler = Arc::new(InboundPings {
            exports: Arc::clone(&self.inner.exports),
            clock: Arc::clone(&self.inner.clock),
        });
        let listener = ResolverListener::bind(
            self.inner.config.bind_address,
            handler,
            self.inner.config.max_frame_len,
        )
        .await?;
        let addr = listener.local_addr();
        *self.inner.resolver_addr.write() = Some(addr);

        let (stop, stopped) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        spawn_periodic(
            "ping",
            self.inner.config.ping_interval,
            weak.clone(),
            stopped.clone(),
            |registry| async move { registry.run_ping_cycle().await },
        );
        if self.inner.config.sweep_enabled {
            spawn_periodic(
                "sweep",
                self.inner.config.sweep_interval,
                weak,
                stopped,
                |registry| async move {
                    registry.run_sweep();
                },
            );
        }

        info!(
            addr = %addr,
            ping_interval = ?self.inner.config.ping_interval,
            sweep_enabled = self.inner.config.sweep_enabled,
            "registry started"
        );
        *runtime = Some(Runtime { listener, stop });
        Ok(addr)
    }

    /// Stop the periodic tasks, close the listener and every cached
    /// connection. In-flight pings are left to finish or fail.
    pub async fn shutdown(&self) {
        let Some(running) = self.inner.runtime.lock().await.take() else {
            return;
        };
        running.stop.send_replace(true);
        running.listener.shutdown().await;
        *self.inner.resolver_addr.write() = None;

        let connections: Vec<_> = self.inner.connections.lock().drain().collect();
        for (addr, connection) in connections {
            debug!(remote = %addr, "closing cached resolver connection");
            connection.close();
        }
        info!("registry shut down");
    }

    pub fn is_running(&self) -> bool {
        self.inner.resolver_addr.read().is_some()
    }

    /// Listener address while running.
    pub fn resolver_addr(&self) -> Option<SocketAddr> {
        *self.inner.resolver_addr.read()
    }

    // ---- export side ----

    /// Export a local object for `session`.
    ///
    /// The registry keeps one clone of `object`; clones the host keeps count
    /// as local references.
    pub fn export(&self, session: SessionId, object: Arc<dyn LocalObject>) -> Result<InterfacePointer> {
        let port = self.resolver_addr().ok_or(DcomError::NotRunning)?.port();
        let mut exports = self.inner.exports.write();
        if let Some(oid) = exports.exported_oid(&object) {
            return Err(DcomError::AlreadyExported(oid));
        }

        let (oxid, oid, ipid) = loop {
            let ids = (Oxid::generate(), Oid::generate(), Ipid::generate());
            if !exports.is_taken(ids.0, ids.1, ids.2) {
                break ids;
            }
        };
        let ptr = InterfacePointer::new(object.interface_id(), port, oxid, oid, ipid);
        exports.insert(ExportedObjectEntry::new(
            object,
            session,
            ptr,
            self.inner.clock.now(),
        ))?;
        debug!(session = %session, oid = %oid, oxid = %oxid, ipid = %ipid, "object exported");
        Ok(ptr)
    }

    pub fn resolve_by_oxid(&self, oxid: &Oxid) -> Option<ExportedObject> {
        self.inner.exports.read().get_by_oxid(oxid).map(ExportedObjectEntry::view)
    }

    pub fn resolve_by_ipid(&self, ipid: &Ipid) -> Option<ExportedObject> {
        self.inner.exports.read().get_by_ipid(ipid).map(ExportedObjectEntry::view)
    }

    pub fn resolve_by_oid(&self, oid: &Oid) -> Option<ExportedObject> {
        self.inner.exports.read().get(oid).map(ExportedObjectEntry::view)
    }

    /// Signal that flips to `true` when the export is swept or torn down.
    pub fn interrupt_signal(&self, oid: &Oid) -> Option<watch::Receiver<bool>> {
        self.inner.exports.read().get(oid).map(ExportedObjectEntry::subscribe)
    }

    pub fn exported_count(&self) -> usize {
        self.inner.exports.read().len()
    }

    /// Remove every object `session` exported. Safe to call repeatedly.
    pub fn destroy_session_references(&self, session: SessionId) -> usize {
        let removed = self.inner.exports.write().remove_session(session);
        for entry in &removed {
            entry.interrupt();
        }
        if !removed.is_empty() {
            info!(session = %session, exports = removed.len(), "session exports destroyed");
        }
        removed.len()
    }

    /// One expiry pass. Returns the OIDs removed.
    pub fn run_sweep(&self) -> Vec<Oid> {
        let removed = self
            .inner
            .exports
            .write()
            .sweep(self.inner.clock.now(), self.inner.config.expiry_window);
        removed
            .iter()
            .map(|entry| {
                entry.interrupt();
                entry.oid()
            })
            .collect()
    }

    // ---- import side ----

    /// Count a reference `session` holds on a remote object and include it
    /// in pings to `resolver`.
    pub fn add_reference(&self, session: SessionId, resolver: SocketAddr, oid: Oid) -> u32 {
        self.inner.ping_sets.lock().add_reference(session, resolver, oid, true)
    }

    /// Count a reference that is never pinged.
    pub fn add_reference_unpinged(&self, session: SessionId, resolver: SocketAddr, oid: Oid) -> u32 {
        self.inner.ping_sets.lock().add_reference(session, resolver, oid, false)
    }

    /// Drop one reference. The last release of the last OID closes the
    /// session's ping set and its cached connection.
    pub fn release_reference(&self, session: SessionId, oid: Oid) -> Result<()> {
        let closed = self.inner.ping_sets.lock().release_reference(session, oid)?;
        if let Some(remote) = closed {
            self.close_connection(remote);
        }
        Ok(())
    }

    /// Forget everything `session` imported.
    pub fn clear_references(&self, session: SessionId) {
        let remotes = self.inner.ping_sets.lock().clear_session(session);
        for remote in &remotes {
            self.close_connection(*remote);
        }
        if !remotes.is_empty() {
            debug!(session = %session, remotes = remotes.len(), "session references cleared");
        }
    }

    /// Register every interface pointer decoded during a call from `peer`.
    pub fn import(&self, session: SessionId, peer: IpAddr, ctx: &DecodeContext) -> Vec<InterfacePointer> {
        let pointers = ctx.interface_pointers().to_vec();
        if pointers.is_empty() {
            return pointers;
        }
        let mut ping_sets = self.inner.ping_sets.lock();
        for ptr in &pointers {
            let resolver = SocketAddr::new(peer, ptr.resolver_port);
            ping_sets.add_reference(session, resolver, ptr.oid, true);
        }
        pointers
    }

    pub fn reference_count(&self, session: SessionId, oid: &Oid) -> Option<u32> {
        self.inner.ping_sets.lock().reference_count(session, oid)
    }

    pub fn ping_set(&self, session: SessionId, resolver: SocketAddr) -> Option<PingSetSnapshot> {
        self.inner.ping_sets.lock().snapshot(session, resolver)
    }

    /// One round of outbound pings. Failures are logged per ping set and
    /// retried on the next round.
    pub async fn run_ping_cycle(&self) {
        let pings = self.inner.ping_sets.lock().prepare_pings();
        if pings.is_empty() {
            return;
        }
        debug!(count = pings.len(), "sending pings");

        let outcomes = join_all(pings.iter().map(|ping| self.send_ping(ping))).await;

        let mut ping_sets = self.inner.ping_sets.lock();
        for (ping, outcome) in pings.iter().zip(outcomes) {
            ping_sets.complete(ping, outcome);
        }
    }

    async fn send_ping(&self, ping: &PendingPing) -> PingOutcome {
        match self.try_send_ping(ping).await {
            Ok(set_id) => PingOutcome::Accepted(set_id),
            Err(e @ DcomError::InvalidSet { .. }) => {
                // the connection is fine, only the set is gone
                warn!(
                    session = %ping.session,
                    remote = %ping.remote,
                    error = %e,
                    "ping set rejected, rebuilding"
                );
                PingOutcome::Rejected
            }
            Err(e) => {
                warn!(
                    session = %ping.session,
                    remote = %ping.remote,
                    set_id = ?ping.set_id,
                    error = %e,
                    "ping failed, will retry"
                );
                self.evict_connection(ping.remote);
                PingOutcome::Failed
            }
        }
    }

    /// Send one ping. A non-OK status comes back as [`DcomError::InvalidSet`].
    async fn try_send_ping(&self, ping: &PendingPing) -> Result<SetId> {
        let connection = self.connection(ping.remote).await?;
        let timeout = self.inner.config.ping_timeout;
        let (set_id, status) = match ping.kind {
            PingKind::Simple => {
                let call = connection.simple_ping(ping.set_id);
                let status = with_timeout(timeout, ping.remote, call).await?;
                (ping.set_id, status)
            }
            PingKind::Complex { sequence } => {
                let request = ComplexPingRequest::new(
                    ping.set_id,
                    sequence,
                    ping.added.clone(),
                    ping.removed.clone(),
                );
                let reply = with_timeout(timeout, ping.remote, connection.complex_ping(request)).await?;
                (reply.set_id, reply.status)
            }
        };
        if status != status::OK {
            return Err(DcomError::InvalidSet {
                set_id: ping.set_id,
                status,
            });
        }
        Ok(set_id)
    }

    async fn connection(&self, remote: SocketAddr) -> Result<Arc<dyn ResolverConnection>> {
        let cached = self.inner.connections.lock().get(&remote).cloned();
        if let Some(connection) = cached {
            return Ok(connection);
        }
        let connection = self.inner.connector.connect(remote).await?;
        let mut cache = self.inner.connections.lock();
        // another ping may have connected first
        Ok(Arc::clone(cache.entry(remote).or_insert(connection)))
    }

    /// Drop a connection that failed so the next round reconnects.
    fn evict_connection(&self, remote: SocketAddr) {
        if let Some(connection) = self.inner.connections.lock().remove(&remote) {
            connection.close();
        }
    }

    /// Close the cached connection unless another ping set still uses it.
    fn close_connection(&self, remote: SocketAddr) {
        let still_used = self.inner.ping_sets.lock().remotes().contains(&remote);
        if still_used {
            return;
        }
        if let Some(connection) = self.inner.connections.lock().remove(&remote) {
            debug!(remote = %remote, "closing resolver connection");
            connection.close();
        }
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    remote: SocketAddr,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| DcomError::Timeout(remote))?
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    registry: Weak<RegistryInner>,
    mut stopped: watch::Receiver<bool>,
    body: F,
) where
    F: Fn(Registry) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stopped.changed() => break,
                _ = ticker.tick() => {
                    let Some(inner) = registry.upgrade() else { break };
                    body(Registry { inner }).await;
                }
            }
        }
        debug!(task = name, "periodic task stopped");
    });
}
