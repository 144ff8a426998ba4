//! DCOM reference registry and distributed garbage collection
//!
//! Tracks which local objects are exported to remote clients and which
//! remote objects this process references, and runs the MS-DCOM ping
//! protocol that keeps both sides alive.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Registry                              │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Exporter (lock group 1)     │  Importer (lock group 2)     │
//! │  - OXID/OID/IPID indexes     │  - per session, per remote   │
//! │  - inbound ping sets         │    ping set holders          │
//! │  - expiry sweep              │  - simple / complex pings    │
//! ├──────────────────────────────┼──────────────────────────────┤
//! │  ResolverListener            │  Connection cache (group 3)  │
//! │  (serves inbound pings)      │  ResolverConnector           │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │              NDR codec (dcom-ndr crate)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **OXID**: object exporter id, one per export here
//! - **OID**: object id, the unit remote clients ping
//! - **IPID**: interface pointer id, names the interface on the object
//! - **SETID**: id of a ping set the remote resolver assigned
//! - **Session**: the connection-scoped owner of exports and imports
//!
//! # Modules
//!
//! - [`types`]: identifiers, sessions, errors, status codes
//! - [`exporter`]: export tables and inbound ping handling
//! - [`importer`]: imported references and outbound ping sets
//! - [`oxid_resolver`]: ping wire format, listener and connector
//! - [`registry`]: the aggregate tying it together

pub mod clock;
pub mod config;
pub mod exporter;
pub mod importer;
pub mod oxid_resolver;
pub mod registry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RegistryConfig;
pub use exporter::{ExportedObject, LocalObject};
pub use importer::{HolderState, PingSetSnapshot};
pub use oxid_resolver::{ResolverConnection, ResolverConnector, ResolverListener, TcpConnector};
pub use registry::Registry;
pub use types::{
    DcomError, InterfacePointer, Ipid, Oid, Oxid, Result, SessionId, SetId, IID_IUNKNOWN,
};

/// Default ping period in seconds (as per MS-DCOM)
pub const DEFAULT_PING_PERIOD_SECS: u64 = 120;

/// Number of ping periods before considering an object dead
pub const DEFAULT_PING_TIMEOUT_PERIODS: u32 = 3;
