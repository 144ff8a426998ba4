//! Byte cursors over little-endian NDR streams
//!
//! Encoding writes through the [`WireSink`] trait so the same code path can
//! either fill a buffer ([`NdrWriter`]) or only measure one ([`SizeCounter`]).
//! Decoding reads from an [`NdrReader`], which tracks its own position for
//! alignment.
//!
//! Every scalar accessor aligns first: a value of size N is preceded by zero
//! padding up to the next multiple of N, counted from the start of the stream.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{NdrError, Result};

/// First referent id handed out for a unique pointer within one stream.
pub const FIRST_REFERENT_ID: u32 = 0x0002_0000;

/// Calculate padding needed to align to the given boundary
#[inline]
pub fn align_padding(position: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return 0;
    }
    let remainder = position % alignment;
    if remainder == 0 {
        0
    } else {
        alignment - remainder
    }
}

/// Destination for encoded NDR bytes.
pub trait WireSink {
    /// Bytes written so far; alignment is computed against this.
    fn position(&self) -> usize;

    /// Append raw bytes without alignment.
    fn put_slice(&mut self, bytes: &[u8]);

    /// Append `count` zero bytes.
    fn put_zeros(&mut self, count: usize);

    /// Allocate the next non-zero referent id for a unique pointer.
    fn next_referent_id(&mut self) -> u32;

    /// Pad with zeros to the given boundary.
    fn align(&mut self, alignment: usize) {
        let padding = align_padding(self.position(), alignment);
        if padding > 0 {
            self.put_zeros(padding);
        }
    }

    fn put_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    fn put_i8(&mut self, value: i8) {
        self.put_slice(&value.to_le_bytes());
    }

    fn put_u16(&mut self, value: u16) {
        self.align(2);
        self.put_slice(&value.to_le_bytes());
    }

    fn put_i16(&mut self, value: i16) {
        self.align(2);
        self.put_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.align(4);
        self.put_slice(&value.to_le_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.align(4);
        self.put_slice(&value.to_le_bytes());
    }

    /// Hyper integers go out as low word then high word.
    fn put_u64(&mut self, value: u64) {
        self.align(8);
        self.put_slice(&(value as u32).to_le_bytes());
        self.put_slice(&((value >> 32) as u32).to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.put_u64(value as u64);
    }

    fn put_f32(&mut self, value: f32) {
        self.align(4);
        self.put_slice(&value.to_le_bytes());
    }

    fn put_f64(&mut self, value: f64) {
        self.align(8);
        self.put_slice(&value.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy)]
struct ReferentIds {
    next: u32,
}

impl ReferentIds {
    fn new() -> Self {
        Self {
            next: FIRST_REFERENT_ID,
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(4).max(FIRST_REFERENT_ID);
        id
    }
}

/// Buffer-backed sink.
#[derive(Debug)]
pub struct NdrWriter {
    buf: BytesMut,
    referents: ReferentIds,
}

impl NdrWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-size the buffer, typically from [`crate::size_of`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            referents: ReferentIds::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl WireSink for NdrWriter {
    fn position(&self) -> usize {
        self.buf.len()
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    fn next_referent_id(&mut self) -> u32 {
        self.referents.allocate()
    }
}

/// Sink that only counts, used to size a value without producing it.
#[derive(Debug)]
pub struct SizeCounter {
    len: usize,
    referents: ReferentIds,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self {
            len: 0,
            referents: ReferentIds::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl WireSink for SizeCounter {
    fn position(&self) -> usize {
        self.len
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }

    fn put_zeros(&mut self, count: usize) {
        self.len += count;
    }

    fn next_referent_id(&mut self) -> u32 {
        self.referents.allocate()
    }
}

/// Read cursor over a received NDR stream.
#[derive(Debug, Clone)]
pub struct NdrReader {
    buf: Bytes,
    position: usize,
}

impl NdrReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self {
            buf: buf.into(),
            position: 0,
        }
    }

    /// Offset from the start of the stream.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let have = self.buf.remaining();
        if have < needed {
            return Err(NdrError::BufferUnderflow { needed, have });
        }
        Ok(())
    }

    fn advance(&mut self, count: usize) {
        self.buf.advance(count);
        self.position += count;
    }

    /// Skip padding up to the given boundary.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = align_padding(self.position, alignment);
        self.ensure(padding)?;
        self.advance(padding);
        Ok(())
    }

    /// Take `count` raw bytes without alignment.
    pub fn get_bytes(&mut self, count: usize) -> Result<Bytes> {
        self.ensure(count)?;
        let bytes = self.buf.split_to(count);
        self.position += count;
        Ok(bytes)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        self.position += 1;
        Ok(self.buf.get_u8())
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        self.position += 1;
        Ok(self.buf.get_i8())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        self.ensure(2)?;
        self.position += 2;
        Ok(self.buf.get_u16_le())
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        self.align(2)?;
        self.ensure(2)?;
        self.position += 2;
        Ok(self.buf.get_i16_le())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        self.ensure(4)?;
        self.position += 4;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.align(4)?;
        self.ensure(4)?;
        self.position += 4;
        Ok(self.buf.get_i32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        self.ensure(8)?;
        self.position += 8;
        let low = self.buf.get_u32_le() as u64;
        let high = self.buf.get_u32_le() as u64;
        Ok((high << 32) | low)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        self.align(4)?;
        self.ensure(4)?;
        self.position += 4;
        Ok(self.buf.get_f32_le())
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.align(8)?;
        self.ensure(8)?;
        self.position += 8;
        Ok(self.buf.get_f64_le())
    }
}
