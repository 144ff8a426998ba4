//! NDR error types

use thiserror::Error;

/// Largest element count accepted from a decoded conformance or variance header.
pub const MAX_NDR_ARRAY_ELEMENTS: usize = 16 * 1024 * 1024;

/// Largest byte allocation a decoded string length header may request.
pub const MAX_NDR_ALLOCATION_SIZE: usize = 64 * 1024 * 1024;

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// The value handed to the codec does not belong to the descriptor's wire kind
    #[error("type mismatch: descriptor is {expected}, value is {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The value exists only in memory and has no wire form
    #[error("not serializable: {0}")]
    NotSerializable(&'static str),

    /// Struct value carries a different member count than its schema
    #[error("struct member count mismatch: schema has {expected}, value has {found}")]
    MemberCountMismatch { expected: usize, found: usize },

    /// Invalid string - bad header or invalid encoding
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Pointer slot could not be resolved after its level was flushed
    #[error("invalid pointer: referent slot {0}")]
    InvalidPointer(usize),

    /// A reference pointer must always have a referent
    #[error("reference pointer cannot be null")]
    NullReferencePointer,

    /// Array size mismatch
    #[error("array size mismatch: expected {expected}, got {got}")]
    ArraySizeMismatch { expected: usize, got: usize },

    /// Array shape is not representable (dimension count, bounds count)
    #[error("invalid array shape: {0}")]
    InvalidArrayShape(String),

    /// No declared bounds and no header carrying them
    #[error("array bounds unknown: no declared bounds and no conformance or variance header")]
    MissingArrayBounds,

    /// Conformance mismatch
    #[error("conformance mismatch: max_count={max_count}, actual_count={actual_count}")]
    ConformanceMismatch { max_count: u32, actual_count: u32 },

    /// Decoded length would exceed the allocation guard
    #[error("allocation limit exceeded: requested {requested}, limit {limit}")]
    AllocationLimitExceeded { requested: usize, limit: usize },

    /// Invalid discriminant for union
    #[error("invalid union discriminant: {0}")]
    InvalidDiscriminant(i64),

    /// Non-encapsulated union decoded without a discriminant
    #[error("union discriminant not supplied")]
    MissingDiscriminant,

    /// Character outside the single-byte range
    #[error("character {0:?} has no single-byte representation")]
    InvalidChar(char),

    /// OLE automation date out of range or not finite
    #[error("invalid date: {0}")]
    InvalidDate(f64),

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// UTF-16 decoding error
    #[error("UTF-16 error: {0}")]
    Utf16Error(#[from] std::string::FromUtf16Error),
}

impl NdrError {
    /// Whether this failure means the peer and the local schema disagree
    /// about the wire layout, as opposed to a truncated or garbled buffer.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(
            self,
            NdrError::BufferUnderflow { .. } | NdrError::Utf8Error(_) | NdrError::Utf16Error(_)
        )
    }
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;
