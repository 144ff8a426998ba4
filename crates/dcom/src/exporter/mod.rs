//! Server side of the reference registry
//!
//! - Export tables: OXID/OID/IPID indexes and per-session export lists
//! - Inbound ping sets: which OIDs each remote client keeps alive
//! - Expiry sweep over both

mod garbage_collection;
mod object;
mod tables;

pub use object::{ExportedObject, LocalObject};
pub(crate) use tables::{ExportTables, ExportedObjectEntry};
