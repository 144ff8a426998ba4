//! Value trees handed to and produced by the codec

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::arrays::ArrayValue;
use crate::error::{NdrError, Result};
use crate::ids::InterfacePointer;

/// A decoded or to-be-encoded value, paired at call time with a
/// [`crate::TypeDescriptor`] of the matching kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(char),
    Uuid(uuid::Uuid),
    /// `None` is the null string.
    String(Option<String>),
    Struct(Vec<Value>),
    Union(UnionValue),
    Pointer(PointerValue),
    Array(ArrayValue),
    InterfacePointer(InterfacePointer),
    Currency(Currency),
    Date(DateValue),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Some(s.into()))
    }

    pub fn null_string() -> Self {
        Value::String(None)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Uuid(_) => "uuid",
            Value::String(_) => "string",
            Value::Struct(_) => "struct",
            Value::Union(_) => "union",
            Value::Pointer(_) => "pointer",
            Value::Array(_) => "array",
            Value::InterfacePointer(_) => "interface pointer",
            Value::Currency(_) => "currency",
            Value::Date(_) => "date",
        }
    }

    /// Integral view, used to read union discriminants from sibling members.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::U8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::Bool(v) => Some(v as i64),
            Value::Char(c) => Some(c as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => s.as_deref(),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Value]> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&PointerValue> {
        match self {
            Value::Pointer(ptr) => Some(ptr),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool, char => Char,
    uuid::Uuid => Uuid, InterfacePointer => InterfacePointer,
    Currency => Currency, DateValue => Date, ArrayValue => Array,
    PointerValue => Pointer, UnionValue => Union,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

/// Selected arm of a non-encapsulated union.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionValue {
    pub discriminant: i64,
    pub value: Box<Value>,
}

impl UnionValue {
    pub fn new(discriminant: i64, value: Value) -> Self {
        Self {
            discriminant,
            value: Box::new(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PointerState {
    Null,
    Resolved(Box<Value>),
    /// Referent not yet read; the slot indexes the level's deferred queue.
    Pending(usize),
}

/// Pointer value: null, or owning its referent.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerValue(pub(crate) PointerState);

impl PointerValue {
    pub fn null() -> Self {
        Self(PointerState::Null)
    }

    pub fn new(referent: Value) -> Self {
        Self(PointerState::Resolved(Box::new(referent)))
    }

    pub(crate) fn pending(slot: usize) -> Self {
        Self(PointerState::Pending(slot))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.0, PointerState::Null)
    }

    /// True only while a decode is still in progress for this level.
    pub fn is_pending(&self) -> bool {
        matches!(self.0, PointerState::Pending(_))
    }

    pub fn referent(&self) -> Option<&Value> {
        match &self.0 {
            PointerState::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_referent(self) -> Option<Value> {
        match self.0 {
            PointerState::Resolved(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<Option<Value>> for PointerValue {
    fn from(referent: Option<Value>) -> Self {
        referent.map_or_else(PointerValue::null, PointerValue::new)
    }
}

/// OLE `CURRENCY`: a signed 64-bit count of ten-thousandths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Currency {
    scaled: i64,
}

impl Currency {
    pub const SCALE: i64 = 10_000;

    /// `units` whole units plus `fractional_units` ten-thousandths. Both
    /// parts carry the sign, so minus 5.25 is `new(-5, -2500)`.
    pub fn new(units: i64, fractional_units: i32) -> Self {
        Self {
            scaled: units
                .saturating_mul(Self::SCALE)
                .saturating_add(fractional_units as i64),
        }
    }

    pub fn from_scaled(scaled: i64) -> Self {
        Self { scaled }
    }

    pub fn scaled(&self) -> i64 {
        self.scaled
    }

    pub fn units(&self) -> i64 {
        self.scaled / Self::SCALE
    }

    pub fn fractional_units(&self) -> i32 {
        (self.scaled % Self::SCALE) as i32
    }
}

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Roughly year 9999 either side of the epoch.
const MAX_OLE_DAYS: f64 = 2_958_465.0;

/// OLE automation `DATE`, held as local wall-clock time.
///
/// On the wire this is a double counting days since 1899-12-30 00:00 local
/// time, so the local zone and DST offset are baked in at conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateValue(NaiveDateTime);

impl DateValue {
    pub fn from_local(local: NaiveDateTime) -> Self {
        Self(local)
    }

    /// Shift a UTC instant by the local zone and DST offset in force at that instant.
    pub fn from_utc(instant: DateTime<Utc>) -> Self {
        Self(instant.with_timezone(&Local).naive_local())
    }

    pub fn local(&self) -> NaiveDateTime {
        self.0
    }

    /// `None` when the wall-clock time does not exist locally (DST gap).
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        Local
            .from_local_datetime(&self.0)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }

    pub(crate) fn to_ole_days(self) -> Result<f64> {
        let epoch = ole_epoch().ok_or(NdrError::InvalidDate(0.0))?;
        let millis = (self.0 - epoch).num_milliseconds();
        Ok(millis as f64 / MILLIS_PER_DAY)
    }

    pub(crate) fn from_ole_days(days: f64) -> Result<Self> {
        if !days.is_finite() || days.abs() > MAX_OLE_DAYS {
            return Err(NdrError::InvalidDate(days));
        }
        let epoch = ole_epoch().ok_or(NdrError::InvalidDate(days))?;
        let millis = (days * MILLIS_PER_DAY).round() as i64;
        epoch
            .checked_add_signed(chrono::Duration::milliseconds(millis))
            .map(Self)
            .ok_or(NdrError::InvalidDate(days))
    }
}

fn ole_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)
}
