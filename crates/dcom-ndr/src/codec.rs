//! Encode/decode dispatch over the closed set of wire kinds
//!
//! The codec is stateless: every call gets its own sink or reader and its
//! own deferred queue. Struct and array levels open a fresh queue and drain
//! it before returning; [`encode_value`] and [`decode_value`] do the same for
//! one top-level parameter, and [`encode_params`] / [`decode_params`] apply
//! that to a whole parameter list.

use bytes::Bytes;

use crate::arrays::{self, ArrayHeaders};
use crate::cursor::{NdrReader, NdrWriter, SizeCounter, WireSink};
use crate::deferred::{DeferredReads, DeferredWrites};
use crate::error::{NdrError, Result};
use crate::flags::Flags;
use crate::ids::InterfacePointer;
use crate::primitives;
use crate::strings;
use crate::types::{PointerKind, PointerSchema, StructSchema, TypeDescriptor, UnionSchema};
use crate::value::{PointerValue, UnionValue, Value};

/// Side inputs and outputs of a decode call.
#[derive(Debug, Default)]
pub struct DecodeContext {
    discriminant: Option<i64>,
    interface_pointers: Vec<InterfacePointer>,
}

impl DecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discriminant for a union decoded outside a struct.
    pub fn with_discriminant(mut self, discriminant: i64) -> Self {
        self.discriminant = Some(discriminant);
        self
    }

    pub fn set_discriminant(&mut self, discriminant: Option<i64>) {
        self.discriminant = discriminant;
    }

    pub fn discriminant(&self) -> Option<i64> {
        self.discriminant
    }

    /// Remote object references seen during decode, in stream order.
    pub fn interface_pointers(&self) -> &[InterfacePointer] {
        &self.interface_pointers
    }

    pub fn take_interface_pointers(&mut self) -> Vec<InterfacePointer> {
        std::mem::take(&mut self.interface_pointers)
    }
}

/// Write `value` as `ty`. Unique pointer referents go to `deferred`.
pub fn encode<'a, S: WireSink>(
    ty: &'a TypeDescriptor,
    value: &'a Value,
    sink: &mut S,
    deferred: &mut DeferredWrites<'a>,
    flags: Flags,
) -> Result<()> {
    match (ty, value) {
        (TypeDescriptor::I8, Value::I8(v)) => sink.put_i8(*v),
        (TypeDescriptor::U8, Value::U8(v)) => sink.put_u8(*v),
        (TypeDescriptor::I16, Value::I16(v)) => sink.put_i16(*v),
        (TypeDescriptor::U16, Value::U16(v)) => sink.put_u16(*v),
        (TypeDescriptor::I32, Value::I32(v)) => sink.put_i32(*v),
        (TypeDescriptor::U32, Value::U32(v)) => sink.put_u32(*v),
        (TypeDescriptor::I64, Value::I64(v)) => sink.put_i64(*v),
        (TypeDescriptor::U64, Value::U64(v)) => sink.put_u64(*v),
        (TypeDescriptor::F32, Value::F32(v)) => sink.put_f32(*v),
        (TypeDescriptor::F64, Value::F64(v)) => sink.put_f64(*v),
        (TypeDescriptor::Bool, Value::Bool(v)) => primitives::put_bool(sink, *v, flags),
        (TypeDescriptor::Char, Value::Char(c)) => primitives::put_char(sink, *c)?,
        (TypeDescriptor::Uuid, Value::Uuid(u)) => primitives::put_uuid(sink, u),
        (TypeDescriptor::String(kind), Value::String(s)) => strings::encode(*kind, s.as_deref(), sink)?,
        (TypeDescriptor::Struct(schema), Value::Struct(members)) => {
            encode_struct(schema, members, sink, flags)?
        }
        (TypeDescriptor::Union(schema), Value::Union(union)) => {
            encode_union(schema, union, sink, deferred, flags)?
        }
        (TypeDescriptor::Pointer(schema), Value::Pointer(ptr)) => {
            encode_pointer(schema, ptr, sink, deferred, flags)?
        }
        (TypeDescriptor::Array(shape), Value::Array(array)) => {
            arrays::encode(shape, array, sink, ArrayHeaders::ALL, flags)?
        }
        (TypeDescriptor::InterfacePointer, Value::InterfacePointer(ptr)) => {
            primitives::put_interface_pointer(sink, ptr)
        }
        (TypeDescriptor::Currency, Value::Currency(c)) => primitives::put_currency(sink, *c),
        (TypeDescriptor::Date, Value::Date(d)) => primitives::put_date(sink, *d)?,
        (ty, value) => {
            return Err(NdrError::TypeMismatch {
                expected: ty.kind_name(),
                found: value.kind_name(),
            })
        }
    }
    Ok(())
}

/// Read a value of kind `ty`.
///
/// Unique pointers come back pending; the caller owning `deferred` drains it
/// with [`flush_reads`] and then resolves the value.
pub fn decode<'a>(
    ty: &'a TypeDescriptor,
    reader: &mut NdrReader,
    deferred: &mut DeferredReads<'a>,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<Value> {
    let value = match ty {
        TypeDescriptor::I8 => Value::I8(reader.get_i8()?),
        TypeDescriptor::U8 => Value::U8(reader.get_u8()?),
        TypeDescriptor::I16 => Value::I16(reader.get_i16()?),
        TypeDescriptor::U16 => Value::U16(reader.get_u16()?),
        TypeDescriptor::I32 => Value::I32(reader.get_i32()?),
        TypeDescriptor::U32 => Value::U32(reader.get_u32()?),
        TypeDescriptor::I64 => Value::I64(reader.get_i64()?),
        TypeDescriptor::U64 => Value::U64(reader.get_u64()?),
        TypeDescriptor::F32 => Value::F32(reader.get_f32()?),
        TypeDescriptor::F64 => Value::F64(reader.get_f64()?),
        TypeDescriptor::Bool => Value::Bool(primitives::get_bool(reader, flags)?),
        TypeDescriptor::Char => Value::Char(primitives::get_char(reader)?),
        TypeDescriptor::Uuid => Value::Uuid(primitives::get_uuid(reader)?),
        TypeDescriptor::String(kind) => Value::String(strings::decode(*kind, reader)?),
        TypeDescriptor::Struct(schema) => decode_struct(schema, reader, flags, ctx)?,
        TypeDescriptor::Union(schema) => {
            let discriminant = ctx.discriminant().ok_or(NdrError::MissingDiscriminant)?;
            decode_union(schema, discriminant, reader, deferred, flags, ctx)?
        }
        TypeDescriptor::Pointer(schema) => decode_pointer(schema, reader, deferred, flags, ctx)?,
        TypeDescriptor::Array(shape) => {
            Value::Array(arrays::decode(shape, reader, ArrayHeaders::ALL, None, flags, ctx)?)
        }
        TypeDescriptor::InterfacePointer => {
            let ptr = primitives::get_interface_pointer(reader)?;
            ctx.interface_pointers.push(ptr);
            Value::InterfacePointer(ptr)
        }
        TypeDescriptor::Currency => Value::Currency(primitives::get_currency(reader)?),
        TypeDescriptor::Date => Value::Date(primitives::get_date(reader)?),
    };
    Ok(value)
}

/// Drain a write queue in FIFO order.
pub fn flush_writes<'a, S: WireSink>(
    sink: &mut S,
    deferred: &mut DeferredWrites<'a>,
    flags: Flags,
) -> Result<()> {
    while let Some((ty, referent)) = deferred.pop() {
        encode(ty, referent, sink, deferred, flags)?;
    }
    Ok(())
}

/// Drain a read queue in FIFO order, filling each reserved slot.
pub fn flush_reads<'a>(
    reader: &mut NdrReader,
    deferred: &mut DeferredReads<'a>,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<()> {
    while let Some((ty, slot)) = deferred.pop() {
        let referent = decode(ty, reader, deferred, flags, ctx)?;
        deferred.fill(slot, referent);
    }
    Ok(())
}

/// Encode one top-level parameter, referents included.
pub fn encode_value<S: WireSink>(ty: &TypeDescriptor, value: &Value, sink: &mut S, flags: Flags) -> Result<()> {
    let mut deferred = DeferredWrites::new();
    encode(ty, value, sink, &mut deferred, flags)?;
    flush_writes(sink, &mut deferred, flags)
}

/// Decode one top-level parameter, referents included.
pub fn decode_value(
    ty: &TypeDescriptor,
    reader: &mut NdrReader,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<Value> {
    let mut deferred = DeferredReads::new();
    let mut value = decode(ty, reader, &mut deferred, flags, ctx)?;
    flush_reads(reader, &mut deferred, flags, ctx)?;
    deferred.resolve(&mut value)?;
    Ok(value)
}

/// Encode a parameter list into a fresh buffer.
pub fn encode_params(params: &[(TypeDescriptor, Value)], flags: Flags) -> Result<Bytes> {
    let mut capacity = 0;
    for (ty, value) in params {
        capacity += size_of(ty, value, flags)?;
    }
    let mut writer = NdrWriter::with_capacity(capacity);
    for (ty, value) in params {
        encode_value(ty, value, &mut writer, flags)?;
    }
    Ok(writer.freeze())
}

/// Decode a parameter list, one value per descriptor.
pub fn decode_params(
    types: &[TypeDescriptor],
    reader: &mut NdrReader,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<Vec<Value>> {
    types
        .iter()
        .map(|ty| decode_value(ty, reader, flags, ctx))
        .collect()
}

/// Wire length of `value` encoded from an 8-aligned offset.
///
/// Array values cache the figure for the shape and flags it was first
/// measured under.
pub fn size_of(ty: &TypeDescriptor, value: &Value, flags: Flags) -> Result<usize> {
    let measure = || {
        let mut counter = SizeCounter::new();
        encode_value(ty, value, &mut counter, flags)?;
        Ok(counter.len())
    };
    match (ty, value) {
        (TypeDescriptor::Array(shape), Value::Array(array)) => array.cached_size(shape, flags, measure),
        _ => measure(),
    }
}

fn encode_struct<'a, S: WireSink>(
    schema: &'a StructSchema,
    members: &'a [Value],
    sink: &mut S,
    flags: Flags,
) -> Result<()> {
    let types = schema.members();
    if types.len() != members.len() {
        return Err(NdrError::MemberCountMismatch {
            expected: types.len(),
            found: members.len(),
        });
    }

    let tail = match (schema.conformant_tail(), members.last()) {
        (Some(shape), Some(Value::Array(array))) => {
            arrays::put_max_counts(sink, array.dims())?;
            Some((shape, array))
        }
        (Some(_), Some(other)) => {
            return Err(NdrError::TypeMismatch {
                expected: "array",
                found: other.kind_name(),
            })
        }
        _ => None,
    };

    sink.align(schema.alignment());
    let mut deferred = DeferredWrites::new();
    for (index, (ty, member)) in types.iter().zip(members).enumerate() {
        if let (TypeDescriptor::Union(union_schema), Value::Union(union)) = (ty, member) {
            check_switch(union_schema, union, members)?;
        }
        match tail {
            Some((shape, array)) if index + 1 == types.len() => {
                arrays::encode(shape, array, sink, ArrayHeaders::WITHOUT_CONFORMANCE, flags)?
            }
            _ => encode(ty, member, sink, &mut deferred, flags)?,
        }
    }
    flush_writes(sink, &mut deferred, flags)
}

fn decode_struct<'a>(
    schema: &'a StructSchema,
    reader: &mut NdrReader,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<Value> {
    let mut hoisted = match schema.conformant_tail() {
        Some(shape) => Some((shape, arrays::get_max_counts(reader, shape.dimensions())?)),
        None => None,
    };

    reader.align(schema.alignment())?;
    let types = schema.members();
    let mut members = Vec::with_capacity(types.len());
    let mut deferred = DeferredReads::new();
    for (index, ty) in types.iter().enumerate() {
        let tail_counts = if index + 1 == types.len() { hoisted.take() } else { None };
        let member = match (ty, tail_counts) {
            (_, Some((shape, counts))) => Value::Array(arrays::decode(
                shape,
                reader,
                ArrayHeaders::WITHOUT_CONFORMANCE,
                Some(counts),
                flags,
                ctx,
            )?),
            (TypeDescriptor::Union(union_schema), None) => {
                let discriminant = match union_schema.switch_member() {
                    Some(switch) => members
                        .get(switch)
                        .and_then(Value::as_i64)
                        .ok_or(NdrError::MissingDiscriminant)?,
                    None => ctx.discriminant().ok_or(NdrError::MissingDiscriminant)?,
                };
                decode_union(union_schema, discriminant, reader, &mut deferred, flags, ctx)?
            }
            (ty, None) => decode(ty, reader, &mut deferred, flags, ctx)?,
        };
        members.push(member);
    }

    flush_reads(reader, &mut deferred, flags, ctx)?;
    let mut value = Value::Struct(members);
    deferred.resolve(&mut value)?;
    Ok(value)
}

/// A union whose discriminant lives in a sibling must agree with it.
fn check_switch(schema: &UnionSchema, union: &UnionValue, siblings: &[Value]) -> Result<()> {
    if let Some(switch) = schema.switch_member() {
        let sibling = siblings
            .get(switch)
            .and_then(Value::as_i64)
            .ok_or(NdrError::MissingDiscriminant)?;
        if sibling != union.discriminant {
            return Err(NdrError::InvalidDiscriminant(union.discriminant));
        }
    }
    Ok(())
}

fn encode_union<'a, S: WireSink>(
    schema: &'a UnionSchema,
    union: &'a UnionValue,
    sink: &mut S,
    deferred: &mut DeferredWrites<'a>,
    flags: Flags,
) -> Result<()> {
    let arm = schema.arm(union.discriminant)?;
    sink.align(schema.alignment());
    encode(arm, &union.value, sink, deferred, flags)
}

fn decode_union<'a>(
    schema: &'a UnionSchema,
    discriminant: i64,
    reader: &mut NdrReader,
    deferred: &mut DeferredReads<'a>,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<Value> {
    let arm = schema.arm(discriminant)?;
    reader.align(schema.alignment())?;
    let value = decode(arm, reader, deferred, flags, ctx)?;
    Ok(Value::Union(UnionValue::new(discriminant, value)))
}

fn encode_pointer<'a, S: WireSink>(
    schema: &'a PointerSchema,
    ptr: &'a PointerValue,
    sink: &mut S,
    deferred: &mut DeferredWrites<'a>,
    flags: Flags,
) -> Result<()> {
    if ptr.is_pending() {
        return Err(NdrError::NotSerializable("pointer with unresolved referent"));
    }
    match (schema.kind(), ptr.referent()) {
        (PointerKind::Ref, Some(referent)) => encode(schema.referent(), referent, sink, deferred, flags),
        (PointerKind::Ref, None) => Err(NdrError::NullReferencePointer),
        (PointerKind::Unique, Some(referent)) => {
            let id = sink.next_referent_id();
            sink.put_u32(id);
            deferred.push(schema.referent(), referent);
            Ok(())
        }
        (PointerKind::Unique, None) => {
            sink.put_u32(0);
            Ok(())
        }
    }
}

fn decode_pointer<'a>(
    schema: &'a PointerSchema,
    reader: &mut NdrReader,
    deferred: &mut DeferredReads<'a>,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<Value> {
    let ptr = match schema.kind() {
        PointerKind::Ref => PointerValue::new(decode(schema.referent(), reader, deferred, flags, ctx)?),
        PointerKind::Unique => {
            if reader.get_u32()? == 0 {
                PointerValue::null()
            } else {
                PointerValue::pending(deferred.reserve(schema.referent()))
            }
        }
    };
    Ok(Value::Pointer(ptr))
}
