//! Registry error types

use std::net::SocketAddr;

use dcom_ndr::{NdrError, Oid, SetId};
use thiserror::Error;

use super::SessionId;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, DcomError>;

/// Registry and resolver errors
#[derive(Error, Debug)]
pub enum DcomError {
    /// The object is already exported under another OID
    #[error("object already exported as OID {0}")]
    AlreadyExported(Oid),

    /// No state is held for the session
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session holds no reference to the OID
    #[error("reference not found: OID {oid} in {session}")]
    ReferenceNotFound { session: SessionId, oid: Oid },

    /// Remote resolver could not be reached
    #[error("resolver at {addr} unreachable: {reason}")]
    Unreachable { addr: SocketAddr, reason: String },

    /// Remote resolver did not answer in time
    #[error("ping to {0} timed out")]
    Timeout(SocketAddr),

    /// Remote resolver rejected a ping set
    #[error("ping set {set_id} rejected with status {status}")]
    InvalidSet { set_id: SetId, status: u32 },

    /// The registry has not been started or is shut down
    #[error("registry is not running")]
    NotRunning,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed resolver frame
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload encode/decode failure
    #[error("NDR error: {0}")]
    Ndr(#[from] NdrError),
}

impl DcomError {
    /// Failures the periodic ping task logs and retries on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DcomError::Unreachable { .. } | DcomError::Timeout(_) | DcomError::Io(_)
        )
    }
}

/// Status codes carried in ping replies (MS-DCOM 3.1.2.5.2)
pub mod status {
    /// Success
    pub const OK: u32 = 0;
    /// Operation number not served by the resolver
    pub const RPC_S_PROCNUM_OUT_OF_RANGE: u32 = 1745;
    /// OID is not known to the resolver
    pub const OR_INVALID_OID: u32 = 1910;
    /// Ping set is not known to the resolver
    pub const OR_INVALID_SET: u32 = 1911;
}
