//! Locally hosted objects and their exported view

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::types::{InterfacePointer, SessionId, IID_IUNKNOWN};

/// An in-process object that can be handed to remote callers.
///
/// The registry keeps one `Arc` clone per export. Any further clone held by
/// the host counts as a live local reference and keeps the object exported
/// past its ping expiry.
pub trait LocalObject: Any + Send + Sync {
    /// Interface id advertised in the exported [`InterfacePointer`].
    fn interface_id(&self) -> uuid::Uuid {
        IID_IUNKNOWN
    }
}

/// Identity of an exported object, independent of the trait object vtable.
pub(crate) fn object_key(object: &Arc<dyn LocalObject>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Lookup result for an exported object
#[derive(Clone)]
pub struct ExportedObject {
    pub interface_pointer: InterfacePointer,
    pub session: SessionId,
    pub object: Arc<dyn LocalObject>,
}

impl fmt::Debug for ExportedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedObject")
            .field("interface_pointer", &self.interface_pointer)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
