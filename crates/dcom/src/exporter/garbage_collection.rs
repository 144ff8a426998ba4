//! Ping-based garbage collection
//!
//! Remote clients keep exported objects alive by pinging sets of OIDs. A
//! complex ping creates or edits a set, a simple ping refreshes it as is.
//! The sweep removes exports whose last ping is older than the expiry window
//! and that the host no longer references itself.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::tables::{ExportTables, ExportedObjectEntry};
use crate::oxid_resolver::{ComplexPingReply, ComplexPingRequest};
use crate::types::{status, Oid, SetId};

/// One remote client's ping set
#[derive(Clone, Debug, Default)]
pub(crate) struct InboundPingSet {
    pub(crate) oids: HashSet<Oid>,
    last_sequence: u16,
}

impl InboundPingSet {
    /// Serial-number comparison, so the client's wrapping counter keeps working.
    fn accepts(&self, sequence: u16) -> bool {
        (sequence.wrapping_sub(self.last_sequence) as i16) > 0
    }
}

#[derive(Default)]
pub(crate) struct InboundPingSets {
    sets: HashMap<SetId, InboundPingSet>,
}

impl InboundPingSets {
    pub(crate) fn get(&self, set_id: &SetId) -> Option<&InboundPingSet> {
        self.sets.get(set_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.sets.len()
    }

    pub(crate) fn forget_oid(&mut self, oid: &Oid) {
        for set in self.sets.values_mut() {
            set.oids.remove(oid);
        }
    }

    fn allocate(&mut self, sequence: u16) -> SetId {
        let set_id = loop {
            let candidate = SetId::generate();
            if !self.sets.contains_key(&candidate) {
                break candidate;
            }
        };
        self.sets.insert(
            set_id,
            InboundPingSet {
                oids: HashSet::new(),
                last_sequence: sequence,
            },
        );
        set_id
    }
}

fn refresh(by_oid: &mut HashMap<Oid, ExportedObjectEntry>, oid: &Oid, now: Instant) -> bool {
    match by_oid.get_mut(oid) {
        Some(entry) => {
            entry.last_ping = now;
            true
        }
        None => false,
    }
}

impl ExportTables {
    /// Refresh every OID of a set.
    pub(crate) fn simple_ping(&mut self, set_id: SetId, now: Instant) -> u32 {
        let Some(set) = self.ping_sets.sets.get(&set_id) else {
            debug!(set_id = %set_id, "simple ping on unknown set");
            return status::OR_INVALID_SET;
        };
        for oid in &set.oids {
            refresh(&mut self.by_oid, oid, now);
        }
        status::OK
    }

    /// Create a set (`set_id` 0) or apply additions and removals to one.
    pub(crate) fn complex_ping(&mut self, request: &ComplexPingRequest, now: Instant) -> ComplexPingReply {
        let set_id = if request.set_id.is_none() {
            let set_id = self.ping_sets.allocate(request.sequence);
            debug!(set_id = %set_id, "ping set created");
            set_id
        } else {
            match self.ping_sets.sets.get(&request.set_id) {
                None => {
                    debug!(set_id = %request.set_id, "complex ping on unknown set");
                    return ComplexPingReply::new(request.set_id, status::OR_INVALID_SET);
                }
                Some(set) if !set.accepts(request.sequence) => {
                    debug!(
                        set_id = %request.set_id,
                        sequence = request.sequence,
                        "replayed complex ping ignored"
                    );
                    return ComplexPingReply::new(request.set_id, status::OK);
                }
                Some(_) => request.set_id,
            }
        };

        let Some(set) = self.ping_sets.sets.get_mut(&set_id) else {
            return ComplexPingReply::new(set_id, status::OR_INVALID_SET);
        };
        for oid in set.oids.iter().filter(|oid| !request.removed.contains(oid)) {
            refresh(&mut self.by_oid, oid, now);
        }
        for oid in &request.added {
            if refresh(&mut self.by_oid, oid, now) {
                set.oids.insert(*oid);
            } else {
                debug!(set_id = %set_id, oid = %oid, "ping for unknown OID ignored");
            }
        }
        for oid in &request.removed {
            set.oids.remove(oid);
        }
        set.last_sequence = request.sequence;
        ComplexPingReply::new(set_id, status::OK)
    }

    /// Remove expired exports that have no local reference, then drop
    /// inbound sets that no longer cover any export.
    pub(crate) fn sweep(&mut self, now: Instant, window: Duration) -> Vec<ExportedObjectEntry> {
        let expired: Vec<Oid> = self
            .by_oid
            .values()
            .filter(|entry| entry.is_expired(now, window) && !entry.has_local_reference())
            .map(ExportedObjectEntry::oid)
            .collect();
        let removed: Vec<ExportedObjectEntry> =
            expired.iter().filter_map(|oid| self.remove(oid)).collect();

        let before = self.ping_sets.sets.len();
        self.ping_sets.sets.retain(|_, set| !set.oids.is_empty());
        let dropped = before - self.ping_sets.sets.len();

        if !removed.is_empty() || dropped > 0 {
            info!(exports = removed.len(), ping_sets = dropped, "expiry sweep removed entries");
        }
        removed
    }
}
