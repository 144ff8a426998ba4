//! OXID/OID/IPID export tables
//!
//! Every export owns exactly one OXID, OID and IPID. The OID index owns the
//! entry; the other indexes map back to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use super::garbage_collection::InboundPingSets;
use super::object::{object_key, ExportedObject, LocalObject};
use crate::types::{DcomError, InterfacePointer, Ipid, Oid, Oxid, Result, SessionId};

/// Registry-owned record of one exported object
pub(crate) struct ExportedObjectEntry {
    pub(crate) object: Arc<dyn LocalObject>,
    pub(crate) session: SessionId,
    pub(crate) interface_pointer: InterfacePointer,
    pub(crate) last_ping: Instant,
    interrupt: watch::Sender<bool>,
}

impl ExportedObjectEntry {
    pub(crate) fn new(
        object: Arc<dyn LocalObject>,
        session: SessionId,
        interface_pointer: InterfacePointer,
        now: Instant,
    ) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            object,
            session,
            interface_pointer,
            last_ping: now,
            interrupt,
        }
    }

    pub(crate) fn oid(&self) -> Oid {
        self.interface_pointer.oid
    }

    pub(crate) fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_ping) > window
    }

    /// The host still holds a clone of the exported `Arc`.
    pub(crate) fn has_local_reference(&self) -> bool {
        Arc::strong_count(&self.object) > 1
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.interrupt.subscribe()
    }

    /// Stop background work tied to this object.
    pub(crate) fn interrupt(&self) {
        self.interrupt.send_replace(true);
    }

    pub(crate) fn view(&self) -> ExportedObject {
        ExportedObject {
            interface_pointer: self.interface_pointer,
            session: self.session,
            object: Arc::clone(&self.object),
        }
    }
}

/// Lock group 1: export indexes plus the inbound ping sets that refresh them
#[derive(Default)]
pub(crate) struct ExportTables {
    pub(crate) by_oid: HashMap<Oid, ExportedObjectEntry>,
    by_oxid: HashMap<Oxid, Oid>,
    by_ipid: HashMap<Ipid, Oid>,
    by_session: HashMap<SessionId, Vec<Oid>>,
    by_object: HashMap<usize, Oid>,
    pub(crate) ping_sets: InboundPingSets,
}

impl ExportTables {
    pub(crate) fn exported_oid(&self, object: &Arc<dyn LocalObject>) -> Option<Oid> {
        self.by_object.get(&object_key(object)).copied()
    }

    pub(crate) fn insert(&mut self, entry: ExportedObjectEntry) -> Result<()> {
        let key = object_key(&entry.object);
        if let Some(oid) = self.by_object.get(&key) {
            return Err(DcomError::AlreadyExported(*oid));
        }
        let ptr = entry.interface_pointer;
        self.by_object.insert(key, ptr.oid);
        self.by_oxid.insert(ptr.oxid, ptr.oid);
        self.by_ipid.insert(ptr.ipid, ptr.oid);
        self.by_session.entry(entry.session).or_default().push(ptr.oid);
        self.by_oid.insert(ptr.oid, entry);
        Ok(())
    }

    /// OXID, OID or IPID already handed out
    pub(crate) fn is_taken(&self, oxid: Oxid, oid: Oid, ipid: Ipid) -> bool {
        self.by_oxid.contains_key(&oxid)
            || self.by_oid.contains_key(&oid)
            || self.by_ipid.contains_key(&ipid)
    }

    pub(crate) fn get(&self, oid: &Oid) -> Option<&ExportedObjectEntry> {
        self.by_oid.get(oid)
    }

    pub(crate) fn get_by_oxid(&self, oxid: &Oxid) -> Option<&ExportedObjectEntry> {
        self.by_oxid.get(oxid).and_then(|oid| self.by_oid.get(oid))
    }

    pub(crate) fn get_by_ipid(&self, ipid: &Ipid) -> Option<&ExportedObjectEntry> {
        self.by_ipid.get(ipid).and_then(|oid| self.by_oid.get(oid))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_oid.len()
    }

    /// Drop an entry from every index. The caller fires its interrupt.
    pub(crate) fn remove(&mut self, oid: &Oid) -> Option<ExportedObjectEntry> {
        let entry = self.by_oid.remove(oid)?;
        let ptr = entry.interface_pointer;
        self.by_oxid.remove(&ptr.oxid);
        self.by_ipid.remove(&ptr.ipid);
        self.by_object.remove(&object_key(&entry.object));
        if let Some(oids) = self.by_session.get_mut(&entry.session) {
            oids.retain(|o| o != oid);
            if oids.is_empty() {
                self.by_session.remove(&entry.session);
            }
        }
        self.ping_sets.forget_oid(oid);
        debug!(oid = %oid, oxid = %ptr.oxid, session = %entry.session, "export removed");
        Some(entry)
    }

    /// Remove everything the session exported.
    pub(crate) fn remove_session(&mut self, session: SessionId) -> Vec<ExportedObjectEntry> {
        let oids = self.by_session.remove(&session).unwrap_or_default();
        oids.iter().filter_map(|oid| self.remove(oid)).collect()
    }
}
