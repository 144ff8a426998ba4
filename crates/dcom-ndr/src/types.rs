//! Wire type descriptors
//!
//! A [`TypeDescriptor`] names one of the protocol's closed set of wire kinds.
//! Composite kinds carry their schema behind an `Arc`, so a descriptor tree
//! is built once and then shared read-only by encoders and decoders on any
//! thread. Alignment for structs and unions is computed when the schema is
//! built and never again.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::arrays::ArrayShape;
use crate::error::{NdrError, Result};

/// The three string wire representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringKind {
    /// Max count, byte length, actual count, UTF-16LE units, no terminator.
    Bstr,
    /// Narrow bytes counted in 16-bit units, padded to even, null-terminated.
    Narrow,
    /// UTF-16LE counted as `units + 1`, null-terminated.
    Wide,
}

/// Pointer wire semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerKind {
    /// Referent id inline, referent deferred to the end of the level; may be null.
    #[default]
    Unique,
    /// No marker; the referent is encoded in place and may not be null.
    Ref,
}

/// Closed set of wire kinds.
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
    Char,
    Uuid,
    String(StringKind),
    Struct(Arc<StructSchema>),
    Union(Arc<UnionSchema>),
    Pointer(Arc<PointerSchema>),
    Array(Arc<ArrayShape>),
    InterfacePointer,
    Currency,
    Date,
}

impl TypeDescriptor {
    pub fn structure(members: Vec<TypeDescriptor>) -> Self {
        TypeDescriptor::Struct(Arc::new(StructSchema::new(members)))
    }

    pub fn union(schema: UnionSchema) -> Self {
        TypeDescriptor::Union(Arc::new(schema))
    }

    /// Unique (nullable, deferred) pointer to `referent`.
    pub fn unique(referent: TypeDescriptor) -> Self {
        TypeDescriptor::Pointer(Arc::new(PointerSchema::new(referent, PointerKind::Unique)))
    }

    /// Reference (non-null, inline) pointer to `referent`.
    pub fn reference(referent: TypeDescriptor) -> Self {
        TypeDescriptor::Pointer(Arc::new(PointerSchema::new(referent, PointerKind::Ref)))
    }

    pub fn array(shape: ArrayShape) -> Self {
        TypeDescriptor::Array(Arc::new(shape))
    }

    /// Alignment the value is padded to before it is written or read.
    pub fn alignment(&self) -> usize {
        match self {
            TypeDescriptor::I8 | TypeDescriptor::U8 | TypeDescriptor::Bool | TypeDescriptor::Char => 1,
            TypeDescriptor::I16 | TypeDescriptor::U16 => 2,
            TypeDescriptor::I32
            | TypeDescriptor::U32
            | TypeDescriptor::F32
            | TypeDescriptor::Uuid
            | TypeDescriptor::String(_) => 4,
            TypeDescriptor::I64
            | TypeDescriptor::U64
            | TypeDescriptor::F64
            | TypeDescriptor::Currency
            | TypeDescriptor::Date
            | TypeDescriptor::InterfacePointer => 8,
            TypeDescriptor::Struct(schema) => schema.alignment(),
            TypeDescriptor::Union(schema) => schema.alignment(),
            TypeDescriptor::Pointer(schema) => match schema.kind() {
                PointerKind::Unique => 4,
                PointerKind::Ref => schema.referent().alignment(),
            },
            TypeDescriptor::Array(shape) => shape.alignment(),
        }
    }

    /// Short name used in mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDescriptor::I8 => "i8",
            TypeDescriptor::U8 => "u8",
            TypeDescriptor::I16 => "i16",
            TypeDescriptor::U16 => "u16",
            TypeDescriptor::I32 => "i32",
            TypeDescriptor::U32 => "u32",
            TypeDescriptor::I64 => "i64",
            TypeDescriptor::U64 => "u64",
            TypeDescriptor::F32 => "f32",
            TypeDescriptor::F64 => "f64",
            TypeDescriptor::Bool => "bool",
            TypeDescriptor::Char => "char",
            TypeDescriptor::Uuid => "uuid",
            TypeDescriptor::String(_) => "string",
            TypeDescriptor::Struct(_) => "struct",
            TypeDescriptor::Union(_) => "union",
            TypeDescriptor::Pointer(_) => "pointer",
            TypeDescriptor::Array(_) => "array",
            TypeDescriptor::InterfacePointer => "interface pointer",
            TypeDescriptor::Currency => "currency",
            TypeDescriptor::Date => "date",
        }
    }
}

/// Ordered member list of a struct.
#[derive(Debug)]
pub struct StructSchema {
    members: Vec<TypeDescriptor>,
    alignment: usize,
    conformant_tail: bool,
}

impl StructSchema {
    /// Build the schema and fix its alignment.
    ///
    /// A trailing conformant array makes the struct conformant: the array's
    /// maximum counts move to the front of the struct.
    pub fn new(members: Vec<TypeDescriptor>) -> Self {
        let conformant_tail = matches!(
            members.last(),
            Some(TypeDescriptor::Array(shape)) if shape.is_conformant()
        );
        let mut alignment = members.iter().map(TypeDescriptor::alignment).max().unwrap_or(1);
        if conformant_tail {
            alignment = alignment.max(4);
        }
        Self {
            members,
            alignment,
            conformant_tail,
        }
    }

    pub fn members(&self) -> &[TypeDescriptor] {
        &self.members
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// The trailing conformant array whose counts are hoisted, if any.
    pub fn conformant_tail(&self) -> Option<&ArrayShape> {
        if !self.conformant_tail {
            return None;
        }
        match self.members.last() {
            Some(TypeDescriptor::Array(shape)) => Some(shape),
            _ => None,
        }
    }
}

/// Arms of a non-encapsulated union.
///
/// The discriminant is never part of the union's own bytes. When the union is
/// a struct member, `switch_member` names the sibling holding it; otherwise
/// the decoder takes it from [`crate::DecodeContext`].
#[derive(Debug)]
pub struct UnionSchema {
    arms: BTreeMap<i64, TypeDescriptor>,
    default_arm: Option<TypeDescriptor>,
    switch_member: Option<usize>,
    alignment: usize,
}

impl UnionSchema {
    pub fn new(arms: impl IntoIterator<Item = (i64, TypeDescriptor)>) -> Self {
        let arms: BTreeMap<_, _> = arms.into_iter().collect();
        let alignment = arms.values().map(TypeDescriptor::alignment).max().unwrap_or(1);
        Self {
            arms,
            default_arm: None,
            switch_member: None,
            alignment,
        }
    }

    /// Arm used for discriminants with no registered arm.
    pub fn with_default(mut self, arm: TypeDescriptor) -> Self {
        self.alignment = self.alignment.max(arm.alignment());
        self.default_arm = Some(arm);
        self
    }

    /// Take the discriminant from the sibling struct member at `index`.
    pub fn switched_by(mut self, index: usize) -> Self {
        self.switch_member = Some(index);
        self
    }

    pub fn switch_member(&self) -> Option<usize> {
        self.switch_member
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Arm registered for `discriminant`.
    pub fn arm(&self, discriminant: i64) -> Result<&TypeDescriptor> {
        self.arms
            .get(&discriminant)
            .or(self.default_arm.as_ref())
            .ok_or(NdrError::InvalidDiscriminant(discriminant))
    }
}

/// Target of a pointer.
#[derive(Debug)]
pub struct PointerSchema {
    referent: TypeDescriptor,
    kind: PointerKind,
}

impl PointerSchema {
    pub fn new(referent: TypeDescriptor, kind: PointerKind) -> Self {
        Self { referent, kind }
    }

    pub fn referent(&self) -> &TypeDescriptor {
        &self.referent
    }

    pub fn kind(&self) -> PointerKind {
        self.kind
    }
}
