//! Client side of the reference registry
//!
//! Tracks remote objects this process references and produces the pings
//! that keep them alive on their exporters.

mod ping_set;

pub use ping_set::{HolderState, PingSetSnapshot};
pub(crate) use ping_set::{PendingPing, PingKind, PingOutcome, PingSets};
