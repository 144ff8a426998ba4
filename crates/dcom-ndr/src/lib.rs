//! NDR value codec for DCOM
//!
//! Converts typed value trees into DCE/NDR wire bytes and back, for the
//! closed set of wire kinds the DCOM protocol uses.
//!
//! # NDR Wire Format
//!
//! - Little-endian throughout
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes)
//! - Structures and unions align to their largest member
//! - Unique pointers write a referent id inline; the referent follows the
//!   enclosing struct, array or top-level parameter
//! - Conformant arrays lead with maximum counts, varying arrays with
//!   (offset, actual count) pairs; a struct ending in a conformant array
//!   carries the counts at its start
//! - Unions are non-encapsulated: the discriminant is not in the union's bytes
//!
//! # Example
//!
//! ```
//! use dcom_ndr::{encode_params, Flags, TypeDescriptor, Value};
//!
//! let point = TypeDescriptor::structure(vec![TypeDescriptor::I16, TypeDescriptor::I32]);
//! let bytes = encode_params(
//!     &[(point, Value::Struct(vec![Value::I16(1), Value::I32(2)]))],
//!     Flags::NONE,
//! )
//! .unwrap();
//! assert_eq!(bytes.as_ref(), &[1, 0, 0, 0, 2, 0, 0, 0]);
//! ```

mod arrays;
mod codec;
mod cursor;
mod deferred;
mod error;
mod flags;
mod ids;
mod primitives;
mod strings;
mod types;
mod value;

pub use arrays::{ArrayHeaders, ArrayShape, ArrayValue, MAX_DIMENSIONS};
pub use codec::{
    decode, decode_params, decode_value, encode, encode_params, encode_value, flush_reads,
    flush_writes, size_of, DecodeContext,
};
pub use cursor::{align_padding, NdrReader, NdrWriter, SizeCounter, WireSink, FIRST_REFERENT_ID};
pub use deferred::{DeferredReads, DeferredWrites};
pub use error::{NdrError, Result, MAX_NDR_ALLOCATION_SIZE, MAX_NDR_ARRAY_ELEMENTS};
pub use flags::Flags;
pub use ids::{InterfacePointer, Ipid, Oid, Oxid, SetId, IID_IUNKNOWN};
pub use types::{PointerKind, PointerSchema, StringKind, StructSchema, TypeDescriptor, UnionSchema};
pub use value::{Currency, DateValue, PointerValue, UnionValue, Value};

/// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};
