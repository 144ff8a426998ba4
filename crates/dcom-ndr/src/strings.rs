//! String wire representations
//!
//! All three kinds start 4-aligned with three `u32` headers.
//!
//! | kind | headers | body |
//! | --- | --- | --- |
//! | BSTR | units, bytes, units | UTF-16LE, no terminator |
//! | narrow | `ceil(len/2)+1`, 0, same | bytes, pad to even, `u16` 0 |
//! | wide | `units+1`, 0, same | UTF-16LE, `u16` 0 |
//!
//! A null narrow or wide string is three zero headers and nothing else;
//! a zero maximum count decodes back to null. A BSTR has no null form and
//! writes the empty string instead.

use crate::cursor::{NdrReader, WireSink};
use crate::error::{NdrError, Result, MAX_NDR_ALLOCATION_SIZE};
use crate::types::StringKind;

pub(crate) fn encode<S: WireSink>(kind: StringKind, value: Option<&str>, sink: &mut S) -> Result<()> {
    sink.align(4);
    match (kind, value) {
        (StringKind::Bstr, value) => {
            let units: Vec<u16> = value.unwrap_or("").encode_utf16().collect();
            let count = count_u32(units.len())?;
            sink.put_u32(count);
            sink.put_u32(count_u32(units.len() * 2)?);
            sink.put_u32(count);
            put_units(sink, &units);
        }
        (StringKind::Narrow | StringKind::Wide, None) => {
            sink.put_u32(0);
            sink.put_u32(0);
            sink.put_u32(0);
        }
        (StringKind::Narrow, Some(s)) => {
            let bytes = s.as_bytes();
            let count = count_u32(bytes.len().div_ceil(2) + 1)?;
            sink.put_u32(count);
            sink.put_u32(0);
            sink.put_u32(count);
            sink.put_slice(bytes);
            if bytes.len() % 2 != 0 {
                sink.put_u8(0);
            }
            sink.put_u16(0);
        }
        (StringKind::Wide, Some(s)) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let count = count_u32(units.len() + 1)?;
            sink.put_u32(count);
            sink.put_u32(0);
            sink.put_u32(count);
            put_units(sink, &units);
            sink.put_u16(0);
        }
    }
    Ok(())
}

pub(crate) fn decode(kind: StringKind, reader: &mut NdrReader) -> Result<Option<String>> {
    reader.align(4)?;
    match kind {
        StringKind::Bstr => {
            let _max_count = reader.get_u32()?;
            let byte_len = reader.get_u32()?;
            let actual = reader.get_u32()? as usize;
            if byte_len as usize != actual * 2 {
                return Err(NdrError::InvalidString(format!(
                    "BSTR byte length {} does not match {} units",
                    byte_len, actual
                )));
            }
            let units = get_units(reader, actual)?;
            Ok(Some(String::from_utf16(&units)?))
        }
        StringKind::Narrow => {
            let max_count = reader.get_u32()?;
            let _offset = reader.get_u32()?;
            let actual = reader.get_u32()?;
            if max_count == 0 {
                return Ok(None);
            }
            check_counts(max_count, actual)?;
            // Body plus any pad byte; the terminator unit is read separately.
            let byte_len = (max_count as usize - 1) * 2;
            guard(byte_len, reader)?;
            let bytes = reader.get_bytes(byte_len)?;
            let body = match bytes.split_last() {
                Some((0, rest)) => rest,
                _ => &bytes[..],
            };
            let s = String::from_utf8(body.to_vec())?;
            reader.get_u16()?;
            Ok(Some(s))
        }
        StringKind::Wide => {
            let max_count = reader.get_u32()?;
            let _offset = reader.get_u32()?;
            let actual = reader.get_u32()?;
            if max_count == 0 {
                return Ok(None);
            }
            check_counts(max_count, actual)?;
            if actual == 0 {
                return Ok(Some(String::new()));
            }
            let units = get_units(reader, actual as usize - 1)?;
            reader.get_u16()?;
            Ok(Some(String::from_utf16(&units)?))
        }
    }
}

fn put_units<S: WireSink>(sink: &mut S, units: &[u16]) {
    for unit in units {
        sink.put_slice(&unit.to_le_bytes());
    }
}

fn get_units(reader: &mut NdrReader, count: usize) -> Result<Vec<u16>> {
    let byte_len = count
        .checked_mul(2)
        .ok_or(NdrError::AllocationLimitExceeded {
            requested: count,
            limit: MAX_NDR_ALLOCATION_SIZE,
        })?;
    guard(byte_len, reader)?;
    let bytes = reader.get_bytes(byte_len)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn guard(byte_len: usize, reader: &NdrReader) -> Result<()> {
    if byte_len > MAX_NDR_ALLOCATION_SIZE {
        return Err(NdrError::AllocationLimitExceeded {
            requested: byte_len,
            limit: MAX_NDR_ALLOCATION_SIZE,
        });
    }
    if byte_len > reader.remaining() {
        return Err(NdrError::BufferUnderflow {
            needed: byte_len,
            have: reader.remaining(),
        });
    }
    Ok(())
}

fn check_counts(max_count: u32, actual: u32) -> Result<()> {
    if actual > max_count {
        return Err(NdrError::ConformanceMismatch {
            max_count,
            actual_count: actual,
        });
    }
    Ok(())
}

fn count_u32(count: usize) -> Result<u32> {
    u32::try_from(count).map_err(|_| NdrError::AllocationLimitExceeded {
        requested: count,
        limit: u32::MAX as usize,
    })
}
