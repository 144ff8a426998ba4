//! Client-side ping sets
//!
//! One holder per (session, remote resolver). A holder tracks the OIDs the
//! session references on that remote and turns changes into ping requests.
//!
//! ```text
//!   New --first add--> Tracking --set empties--> Closing (removed)
//!                       ^    |
//!                       +----+ add / release
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::oxid_resolver::MAX_OIDS_PER_PING;
use crate::types::{DcomError, Oid, Result, SessionId, SetId};

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`PingSetHolder`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolderState {
    New,
    Tracking,
    Closing,
}

#[derive(Clone, Copy, Debug)]
struct ImportedReference {
    count: u32,
    pinged: bool,
}

/// Point-in-time view of a holder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingSetSnapshot {
    pub state: HolderState,
    pub set_id: SetId,
    pub sequence: u16,
    pub oids: Vec<Oid>,
}

pub(crate) struct PingSetHolder {
    epoch: u64,
    state: HolderState,
    set_id: SetId,
    references: HashMap<Oid, ImportedReference>,
    /// OIDs the remote currently has in the set
    pinged: HashSet<Oid>,
    modified: bool,
    sequence: u16,
}

impl PingSetHolder {
    fn new() -> Self {
        Self {
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
            state: HolderState::New,
            set_id: SetId::NONE,
            references: HashMap::new(),
            pinged: HashSet::new(),
            modified: false,
            sequence: 0,
        }
    }

    fn add(&mut self, oid: Oid, pinged: bool) -> u32 {
        let reference = self.references.entry(oid).or_insert_with(|| {
            self.modified = true;
            ImportedReference { count: 0, pinged }
        });
        reference.count += 1;
        self.state = HolderState::Tracking;
        reference.count
    }

    /// Returns the remaining count, or `None` if the OID is not held.
    fn release(&mut self, oid: &Oid) -> Option<u32> {
        let reference = self.references.get_mut(oid)?;
        reference.count = reference.count.saturating_sub(1);
        let remaining = reference.count;
        if remaining == 0 {
            self.references.remove(oid);
            self.modified = true;
            if self.references.is_empty() {
                self.state = HolderState::Closing;
            }
        }
        Some(remaining)
    }

    fn live_pinged(&self) -> HashSet<Oid> {
        self.references
            .iter()
            .filter(|(_, r)| r.pinged)
            .map(|(oid, _)| *oid)
            .collect()
    }

    /// Work out the next ping and assume it succeeds; [`PingSets::complete`]
    /// undoes the assumption on failure.
    fn prepare(&mut self, session: SessionId, remote: SocketAddr) -> Option<PendingPing> {
        let live = self.live_pinged();
        let mut added: Vec<Oid> = live.difference(&self.pinged).copied().collect();
        let mut removed: Vec<Oid> = self.pinged.difference(&live).copied().collect();
        if self.set_id.is_none() {
            // nothing on the remote to remove from yet
            removed.clear();
            self.pinged.retain(|oid| live.contains(oid));
            if added.is_empty() {
                return None;
            }
        }

        // a large diff goes out over several ticks
        let pending = added.len() + removed.len();
        if pending > MAX_OIDS_PER_PING {
            added.sort();
            removed.sort();
            added.truncate(MAX_OIDS_PER_PING);
            removed.truncate(MAX_OIDS_PER_PING - added.len());
            debug!(
                session = %session,
                remote = %remote,
                pending,
                deferred = pending - added.len() - removed.len(),
                "splitting ping set diff"
            );
        }

        let kind = if !self.set_id.is_none() && !self.modified && added.is_empty() && removed.is_empty() {
            PingKind::Simple
        } else {
            let sequence = self.sequence;
            self.sequence = self.sequence.wrapping_add(1);
            PingKind::Complex { sequence }
        };

        for oid in &removed {
            self.pinged.remove(oid);
        }
        self.pinged.extend(added.iter().copied());
        self.modified = false;
        Some(PendingPing {
            session,
            remote,
            epoch: self.epoch,
            set_id: self.set_id,
            kind,
            added,
            removed,
        })
    }

    fn snapshot(&self) -> PingSetSnapshot {
        let mut oids: Vec<Oid> = self.references.keys().copied().collect();
        oids.sort();
        PingSetSnapshot {
            state: self.state,
            set_id: self.set_id,
            sequence: self.sequence,
            oids,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PingKind {
    Simple,
    Complex { sequence: u16 },
}

/// A ping computed under the lock and sent outside it
#[derive(Clone, Debug)]
pub(crate) struct PendingPing {
    pub(crate) session: SessionId,
    pub(crate) remote: SocketAddr,
    epoch: u64,
    pub(crate) set_id: SetId,
    pub(crate) kind: PingKind,
    pub(crate) added: Vec<Oid>,
    pub(crate) removed: Vec<Oid>,
}

/// Outcome of a sent ping as seen by the holder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PingOutcome {
    /// Remote accepted; carries the set id it reported
    Accepted(SetId),
    /// Remote no longer knows the set
    Rejected,
    /// Transport failure; retry the same diff next tick
    Failed,
}

/// Lock group 2: session -> remote -> holder
#[derive(Default)]
pub(crate) struct PingSets {
    holders: HashMap<SessionId, HashMap<SocketAddr, PingSetHolder>>,
}

impl PingSets {
    pub(crate) fn add_reference(&mut self, session: SessionId, remote: SocketAddr, oid: Oid, pinged: bool) -> u32 {
        let holder = self
            .holders
            .entry(session)
            .or_default()
            .entry(remote)
            .or_insert_with(PingSetHolder::new);
        let count = holder.add(oid, pinged);
        debug!(session = %session, remote = %remote, oid = %oid, count, "reference added");
        count
    }

    /// Decrement a reference. When the holder empties it is removed and its
    /// remote address returned so the caller can drop the connection.
    pub(crate) fn release_reference(&mut self, session: SessionId, oid: Oid) -> Result<Option<SocketAddr>> {
        let holders = self
            .holders
            .get_mut(&session)
            .ok_or(DcomError::SessionNotFound(session))?;
        let (remote, remaining, closing) = holders
            .iter_mut()
            .find_map(|(remote, holder)| {
                holder
                    .release(&oid)
                    .map(|remaining| (*remote, remaining, holder.state == HolderState::Closing))
            })
            .ok_or(DcomError::ReferenceNotFound { session, oid })?;
        debug!(session = %session, remote = %remote, oid = %oid, remaining, "reference released");

        if !closing {
            return Ok(None);
        }
        holders.remove(&remote);
        if holders.is_empty() {
            self.holders.remove(&session);
        }
        debug!(session = %session, remote = %remote, "ping set closed");
        Ok(Some(remote))
    }

    /// Close every holder of the session, returning their remotes.
    pub(crate) fn clear_session(&mut self, session: SessionId) -> Vec<SocketAddr> {
        self.holders
            .remove(&session)
            .map(|holders| holders.into_keys().collect())
            .unwrap_or_default()
    }

    pub(crate) fn reference_count(&self, session: SessionId, oid: &Oid) -> Option<u32> {
        self.holders
            .get(&session)?
            .values()
            .find_map(|holder| holder.references.get(oid).map(|r| r.count))
    }

    pub(crate) fn snapshot(&self, session: SessionId, remote: SocketAddr) -> Option<PingSetSnapshot> {
        self.holders.get(&session)?.get(&remote).map(PingSetHolder::snapshot)
    }

    pub(crate) fn remotes(&self) -> HashSet<SocketAddr> {
        self.holders.values().flat_map(|h| h.keys().copied()).collect()
    }

    pub(crate) fn prepare_pings(&mut self) -> Vec<PendingPing> {
        let mut pings = Vec::new();
        for (session, holders) in &mut self.holders {
            for (remote, holder) in holders.iter_mut() {
                if let Some(ping) = holder.prepare(*session, *remote) {
                    pings.push(ping);
                }
            }
        }
        pings
    }

    /// Fold a ping result back into its holder, if the holder still exists.
    pub(crate) fn complete(&mut self, ping: &PendingPing, outcome: PingOutcome) {
        let Some(holder) = self
            .holders
            .get_mut(&ping.session)
            .and_then(|holders| holders.get_mut(&ping.remote))
            .filter(|holder| holder.epoch == ping.epoch)
        else {
            return;
        };
        match outcome {
            PingOutcome::Accepted(set_id) => {
                if let PingKind::Complex { .. } = ping.kind {
                    holder.set_id = set_id;
                }
            }
            PingOutcome::Rejected => {
                // start over with a fresh set on the next tick
                holder.set_id = SetId::NONE;
                holder.pinged.clear();
                holder.sequence = 0;
                holder.modified = true;
            }
            PingOutcome::Failed => {
                for oid in &ping.added {
                    holder.pinged.remove(oid);
                }
                holder.pinged.extend(ping.removed.iter().copied());
                holder.modified = true;
            }
        }
    }
}
