//! DCOM identifier types (MS-DCOM 2.2.18)
//!
//! - OXID: object exporter identifier, one per hosting process instance
//! - OID: object identifier within an exporter
//! - IPID: interface pointer identifier
//! - SETID: ping set identifier, assigned by the side being pinged
//!
//! Together with [`InterfacePointer`], these are the handles that travel on
//! the wire whenever a remote object reference is passed.

use std::fmt;

/// IID of `IUnknown`, used for exported objects that do not name their own interface.
pub const IID_IUNKNOWN: uuid::Uuid = uuid::Uuid::from_u128(0x0000_0000_0000_0000_c000_0000_0000_0046);

/// Object Exporter Identifier (8 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Oxid(pub u64);

impl Oxid {
    /// Size of OXID in bytes
    pub const SIZE: usize = 8;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Random, never zero.
    pub fn generate() -> Self {
        Self(random_nonzero())
    }
}

impl fmt::Debug for Oxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OXID({:016x})", self.0)
    }
}

impl fmt::Display for Oxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Object Identifier (8 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Oid(pub u64);

impl Oid {
    /// Size of OID in bytes
    pub const SIZE: usize = 8;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Random, never zero.
    pub fn generate() -> Self {
        Self(random_nonzero())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OID({:016x})", self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Interface Pointer Identifier (16 bytes / UUID)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipid(pub uuid::Uuid);

impl Ipid {
    /// Size of IPID in bytes
    pub const SIZE: usize = 16;

    pub fn new(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Fresh random (v4) IPID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for Ipid {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for Ipid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPID({})", self.0)
    }
}

impl fmt::Display for Ipid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ping Set Identifier (8 bytes)
///
/// Zero on the wire means "no set yet"; the pinged side allocates one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SetId(pub u64);

impl SetId {
    /// Size of SETID in bytes
    pub const SIZE: usize = 8;

    /// The "no set allocated" value.
    pub const NONE: SetId = SetId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Random, never zero.
    pub fn generate() -> Self {
        Self(random_nonzero())
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SETID({:016x})", self.0)
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn random_nonzero() -> u64 {
    loop {
        let value: u64 = rand::random();
        if value != 0 {
            return value;
        }
    }
}

/// Serializable handle to a remote object.
///
/// On the wire: interface id, resolver port, OXID, OID, IPID, each aligned
/// to its own size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfacePointer {
    pub iid: uuid::Uuid,
    pub resolver_port: u16,
    pub oxid: Oxid,
    pub oid: Oid,
    pub ipid: Ipid,
}

impl InterfacePointer {
    pub fn new(iid: uuid::Uuid, resolver_port: u16, oxid: Oxid, oid: Oid, ipid: Ipid) -> Self {
        Self {
            iid,
            resolver_port,
            oxid,
            oid,
            ipid,
        }
    }
}
