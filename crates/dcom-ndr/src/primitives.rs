//! Fixed-size wire kinds that need more than a single scalar put/get

use crate::cursor::{NdrReader, WireSink};
use crate::error::{NdrError, Result};
use crate::flags::Flags;
use crate::ids::{InterfacePointer, Ipid, Oid, Oxid};
use crate::value::{Currency, DateValue};

const VARIANT_TRUE: u16 = 0xFFFF;

pub(crate) fn put_bool<S: WireSink>(sink: &mut S, value: bool, flags: Flags) {
    if flags.contains(Flags::VARIANT_BOOL) {
        sink.put_u16(if value { VARIANT_TRUE } else { 0 });
    } else {
        sink.put_u8(value as u8);
    }
}

pub(crate) fn get_bool(reader: &mut NdrReader, flags: Flags) -> Result<bool> {
    if flags.contains(Flags::VARIANT_BOOL) {
        Ok(reader.get_u16()? != 0)
    } else {
        Ok(reader.get_u8()? != 0)
    }
}

/// Characters are single bytes (ISO-8859-1).
pub(crate) fn put_char<S: WireSink>(sink: &mut S, value: char) -> Result<()> {
    let byte = u8::try_from(value as u32).map_err(|_| NdrError::InvalidChar(value))?;
    sink.put_u8(byte);
    Ok(())
}

pub(crate) fn get_char(reader: &mut NdrReader) -> Result<char> {
    Ok(char::from(reader.get_u8()?))
}

/// GUID layout: Data1 `u32`, Data2 `u16`, Data3 `u16` little-endian, then 8 raw bytes.
pub(crate) fn put_uuid<S: WireSink>(sink: &mut S, value: &uuid::Uuid) {
    sink.align(4);
    sink.put_slice(&value.to_bytes_le());
}

pub(crate) fn get_uuid(reader: &mut NdrReader) -> Result<uuid::Uuid> {
    reader.align(4)?;
    let bytes = reader.get_bytes(16)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&bytes);
    Ok(uuid::Uuid::from_bytes_le(raw))
}

pub(crate) fn put_interface_pointer<S: WireSink>(sink: &mut S, ptr: &InterfacePointer) {
    sink.align(8);
    put_uuid(sink, &ptr.iid);
    sink.put_u16(ptr.resolver_port);
    sink.put_u64(ptr.oxid.0);
    sink.put_u64(ptr.oid.0);
    put_uuid(sink, ptr.ipid.uuid());
}

pub(crate) fn get_interface_pointer(reader: &mut NdrReader) -> Result<InterfacePointer> {
    reader.align(8)?;
    let iid = get_uuid(reader)?;
    let resolver_port = reader.get_u16()?;
    let oxid = Oxid(reader.get_u64()?);
    let oid = Oid(reader.get_u64()?);
    let ipid = Ipid(get_uuid(reader)?);
    Ok(InterfacePointer::new(iid, resolver_port, oxid, oid, ipid))
}

/// `CY` is an 8-aligned struct of low and high 32-bit words of the
/// two's-complement scaled value.
pub(crate) fn put_currency<S: WireSink>(sink: &mut S, value: Currency) {
    let raw = value.scaled() as u64;
    sink.align(8);
    sink.put_u32(raw as u32);
    sink.put_u32((raw >> 32) as u32);
}

pub(crate) fn get_currency(reader: &mut NdrReader) -> Result<Currency> {
    reader.align(8)?;
    let low = reader.get_u32()? as u64;
    let high = reader.get_u32()? as u64;
    Ok(Currency::from_scaled(((high << 32) | low) as i64))
}

pub(crate) fn put_date<S: WireSink>(sink: &mut S, value: DateValue) -> Result<()> {
    sink.put_f64(value.to_ole_days()?);
    Ok(())
}

pub(crate) fn get_date(reader: &mut NdrReader) -> Result<DateValue> {
    DateValue::from_ole_days(reader.get_f64()?)
}
