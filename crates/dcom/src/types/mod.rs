//! Core registry types
//!
//! - Identifiers: OXID, OID, IPID, SETID (shared with the codec)
//! - Sessions: the per-connection scope that exports and imports belong to
//! - Errors and ping status codes

mod error;
mod session;

pub use error::*;
pub use session::SessionId;

pub use dcom_ndr::{InterfacePointer, Ipid, Oid, Oxid, SetId, IID_IUNKNOWN};
