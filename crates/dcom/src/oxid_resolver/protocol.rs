//! IObjectExporter ping wire protocol (MS-DCOM 3.1.2.5.2)
//!
//! Payloads are NDR-encoded through `dcom_ndr`. Each request and reply
//! travels in a frame:
//!
//! ```text
//! +----------------+---------------+-------------+
//! | length: u32 LE | opnum: u16 LE | NDR payload |
//! +----------------+---------------+-------------+
//! ```
//!
//! `length` counts the opnum and the payload. A reply carries the opnum of
//! the request it answers.

use bytes::{BufMut, Bytes, BytesMut};
use dcom_ndr::{
    decode_params, encode_params, ArrayShape, ArrayValue, DecodeContext, Flags, NdrError,
    NdrReader, PointerValue, TypeDescriptor, Value,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{DcomError, Oid, Result, SetId};

/// IObjectExporter interface UUID
pub const OBJECT_EXPORTER_UUID: &str = "99fcfec4-5260-101b-bbcb-00aa0021347a";

/// Operation numbers served by the resolver listener
pub mod opnum {
    /// SimplePing operation
    pub const SIMPLE_PING: u16 = 1;
    /// ComplexPing operation
    pub const COMPLEX_PING: u16 = 2;
    /// ServerAlive operation
    pub const SERVER_ALIVE: u16 = 3;
}

/// Ping backoff factor returned in every ComplexPing reply
pub const PING_BACKOFF_FACTOR: u16 = 1;

/// Most OIDs, added and removed together, carried by one ComplexPing.
/// A request at the limit stays well inside the default 64 KiB frame.
pub const MAX_OIDS_PER_PING: usize = 4096;

/// One request or reply on the resolver connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub opnum: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Length prefix plus opnum
    pub const HEADER_LEN: usize = 6;

    pub fn new(opnum: u16, payload: Bytes) -> Self {
        Self { opnum, payload }
    }

    /// Value of the length prefix for a payload of `payload_len` bytes.
    fn length_prefix(payload_len: usize) -> Result<u32> {
        payload_len
            .checked_add(2)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or_else(|| {
                DcomError::InvalidFrame(format!("payload of {} bytes does not fit a frame", payload_len))
            })
    }

    pub fn encode(&self) -> Result<Bytes> {
        let length = Self::length_prefix(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.payload.len());
        buf.put_u32_le(length);
        buf.put_u16_le(self.opnum);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()?).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the next frame. `None` means the peer closed cleanly between frames.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Option<Frame>> {
        let length = match reader.read_u32_le().await {
            Ok(length) => length as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if length < 2 {
            return Err(DcomError::InvalidFrame(format!("frame length {} too short", length)));
        }
        if length > max_len {
            return Err(DcomError::InvalidFrame(format!(
                "frame length {} exceeds limit {}",
                length, max_len
            )));
        }
        let opnum = reader.read_u16_le().await?;
        let mut payload = vec![0u8; length - 2];
        reader.read_exact(&mut payload).await?;
        Ok(Some(Frame::new(opnum, Bytes::from(payload))))
    }
}

/// SimplePing request: refresh every OID of a set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimplePingRequest {
    pub set_id: SetId,
}

impl SimplePingRequest {
    pub fn new(set_id: SetId) -> Self {
        Self { set_id }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(encode_params(&[(TypeDescriptor::U64, Value::U64(self.set_id.0))], Flags::NONE)?)
    }

    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut values = decode_payload(&[TypeDescriptor::U64], payload)?.into_iter();
        Ok(Self {
            set_id: SetId(take_u64(&mut values)?),
        })
    }
}

/// Reply to SimplePing and ServerAlive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReply {
    pub status: u32,
}

impl StatusReply {
    pub fn new(status: u32) -> Self {
        Self { status }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(encode_params(&[(TypeDescriptor::U32, Value::U32(self.status))], Flags::NONE)?)
    }

    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut values = decode_payload(&[TypeDescriptor::U32], payload)?.into_iter();
        Ok(Self {
            status: take_u32(&mut values)?,
        })
    }
}

/// ComplexPing request: create a set, or change and refresh one
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComplexPingRequest {
    pub set_id: SetId,
    pub sequence: u16,
    pub added: Vec<Oid>,
    pub removed: Vec<Oid>,
}

impl ComplexPingRequest {
    pub fn new(set_id: SetId, sequence: u16, added: Vec<Oid>, removed: Vec<Oid>) -> Self {
        Self {
            set_id,
            sequence,
            added,
            removed,
        }
    }

    /// `{SETID, seq, cAdd, cDel, [unique] OID add[cAdd], [unique] OID del[cDel]}`
    fn descriptor() -> Result<TypeDescriptor> {
        let oid_list = || -> Result<TypeDescriptor> {
            let shape = ArrayShape::new(TypeDescriptor::U64, 1)?.conformant();
            Ok(TypeDescriptor::unique(TypeDescriptor::array(shape)))
        };
        Ok(TypeDescriptor::structure(vec![
            TypeDescriptor::U64,
            TypeDescriptor::U16,
            TypeDescriptor::U16,
            TypeDescriptor::U16,
            oid_list()?,
            oid_list()?,
        ]))
    }

    pub fn encode(&self) -> Result<Bytes> {
        let value = Value::Struct(vec![
            Value::U64(self.set_id.0),
            Value::U16(self.sequence),
            Value::U16(oid_count(&self.added)?),
            Value::U16(oid_count(&self.removed)?),
            oid_list_value(&self.added),
            oid_list_value(&self.removed),
        ]);
        Ok(encode_params(&[(Self::descriptor()?, value)], Flags::NONE)?)
    }

    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut params = decode_payload(&[Self::descriptor()?], payload)?.into_iter();
        let members = match params.next() {
            Some(Value::Struct(members)) => members,
            Some(other) => return Err(mismatch("struct", &other)),
            None => return Err(missing()),
        };
        let mut members = members.into_iter();
        let set_id = SetId(take_u64(&mut members)?);
        let sequence = take_u16(&mut members)?;
        let add_count = take_u16(&mut members)?;
        let del_count = take_u16(&mut members)?;
        let added = take_oid_list(&mut members, add_count)?;
        let removed = take_oid_list(&mut members, del_count)?;
        Ok(Self {
            set_id,
            sequence,
            added,
            removed,
        })
    }
}

/// Reply to ComplexPing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComplexPingReply {
    pub set_id: SetId,
    pub backoff: u16,
    pub status: u32,
}

impl ComplexPingReply {
    pub fn new(set_id: SetId, status: u32) -> Self {
        Self {
            set_id,
            backoff: PING_BACKOFF_FACTOR,
            status,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(encode_params(
            &[
                (TypeDescriptor::U64, Value::U64(self.set_id.0)),
                (TypeDescriptor::U16, Value::U16(self.backoff)),
                (TypeDescriptor::U32, Value::U32(self.status)),
            ],
            Flags::NONE,
        )?)
    }

    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut values = decode_payload(
            &[TypeDescriptor::U64, TypeDescriptor::U16, TypeDescriptor::U32],
            payload,
        )?
        .into_iter();
        Ok(Self {
            set_id: SetId(take_u64(&mut values)?),
            backoff: take_u16(&mut values)?,
            status: take_u32(&mut values)?,
        })
    }
}

fn decode_payload(types: &[TypeDescriptor], payload: Bytes) -> Result<Vec<Value>> {
    let mut reader = NdrReader::new(payload);
    let mut ctx = DecodeContext::new();
    Ok(decode_params(types, &mut reader, Flags::NONE, &mut ctx)?)
}

fn oid_count(oids: &[Oid]) -> Result<u16> {
    u16::try_from(oids.len()).map_err(|_| {
        NdrError::AllocationLimitExceeded {
            requested: oids.len(),
            limit: u16::MAX as usize,
        }
        .into()
    })
}

fn oid_list_value(oids: &[Oid]) -> Value {
    if oids.is_empty() {
        return Value::Pointer(PointerValue::null());
    }
    let elements = oids.iter().map(|oid| Value::U64(oid.0)).collect();
    Value::Pointer(PointerValue::new(Value::Array(ArrayValue::new(elements))))
}

fn take_oid_list(values: &mut impl Iterator<Item = Value>, count: u16) -> Result<Vec<Oid>> {
    let pointer = match values.next() {
        Some(Value::Pointer(pointer)) => pointer,
        Some(other) => return Err(mismatch("pointer", &other)),
        None => return Err(missing()),
    };
    let oids = match pointer.into_referent() {
        None => Vec::new(),
        Some(Value::Array(array)) => array
            .into_elements()
            .into_iter()
            .map(|element| match element {
                Value::U64(v) => Ok(Oid(v)),
                other => Err(mismatch("u64", &other)),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => return Err(mismatch("array", &other)),
    };
    if oids.len() != count as usize {
        return Err(NdrError::ArraySizeMismatch {
            expected: count as usize,
            got: oids.len(),
        }
        .into());
    }
    Ok(oids)
}

fn take_u64(values: &mut impl Iterator<Item = Value>) -> Result<u64> {
    match values.next() {
        Some(Value::U64(v)) => Ok(v),
        Some(other) => Err(mismatch("u64", &other)),
        None => Err(missing()),
    }
}

fn take_u32(values: &mut impl Iterator<Item = Value>) -> Result<u32> {
    match values.next() {
        Some(Value::U32(v)) => Ok(v),
        Some(other) => Err(mismatch("u32", &other)),
        None => Err(missing()),
    }
}

fn take_u16(values: &mut impl Iterator<Item = Value>) -> Result<u16> {
    match values.next() {
        Some(Value::U16(v)) => Ok(v),
        Some(other) => Err(mismatch("u16", &other)),
        None => Err(missing()),
    }
}

fn mismatch(expected: &'static str, found: &Value) -> DcomError {
    NdrError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
    .into()
}

fn missing() -> DcomError {
    DcomError::InvalidFrame("payload ended before all fields were decoded".into())
}
