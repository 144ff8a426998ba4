//! Array shapes and the codec's array branch
//!
//! An [`ArrayShape`] is built once per array type: dimension count (1 or 2),
//! optional declared bounds, conformant/varying flags and the element
//! descriptor. Values are stored flattened in row-major order in an
//! [`ArrayValue`] together with their per-dimension lengths.
//!
//! Wire layout, outermost dimension first:
//!
//! ```text
//! [max_count; dims]            if conformant and conformance headers are on
//! [(offset, actual); dims]     if varying and variance headers are on
//! elements, row-major, each aligned to its own kind
//! deferred referents of the elements
//! ```
//!
//! A dimension of length 0 ends the dimension list: no header is written
//! for the dimensions below it and no elements follow.

use std::sync::{Arc, OnceLock};

use crate::codec::{self, DecodeContext};
use crate::cursor::{NdrReader, WireSink};
use crate::deferred::{DeferredReads, DeferredWrites};
use crate::error::{NdrError, Result, MAX_NDR_ARRAY_ELEMENTS};
use crate::flags::Flags;
use crate::types::TypeDescriptor;
use crate::value::Value;

/// Highest supported dimension count.
pub const MAX_DIMENSIONS: usize = 2;

/// Which header groups an array writes or expects.
///
/// A struct ending in a conformant array writes that array's maximum counts
/// itself, then encodes the array with `conformance` off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayHeaders {
    pub conformance: bool,
    pub variance: bool,
}

impl ArrayHeaders {
    pub const ALL: ArrayHeaders = ArrayHeaders {
        conformance: true,
        variance: true,
    };

    pub const WITHOUT_CONFORMANCE: ArrayHeaders = ArrayHeaders {
        conformance: false,
        variance: true,
    };
}

/// Dimensionality, bounds and element type of an array kind.
#[derive(Debug)]
pub struct ArrayShape {
    element: TypeDescriptor,
    dimensions: usize,
    upper_bounds: Option<Vec<u32>>,
    conformant: bool,
    varying: bool,
}

impl ArrayShape {
    /// Fixed array with bounds learned at encode time (or supplied with
    /// [`ArrayShape::with_upper_bounds`]).
    pub fn new(element: TypeDescriptor, dimensions: usize) -> Result<Self> {
        if dimensions == 0 || dimensions > MAX_DIMENSIONS {
            return Err(NdrError::InvalidArrayShape(format!(
                "{} dimensions, supported 1..={}",
                dimensions, MAX_DIMENSIONS
            )));
        }
        Ok(Self {
            element,
            dimensions,
            upper_bounds: None,
            conformant: false,
            varying: false,
        })
    }

    /// Declare per-dimension bounds; their count must equal the dimension count.
    pub fn with_upper_bounds(mut self, bounds: Vec<u32>) -> Result<Self> {
        if bounds.len() != self.dimensions {
            return Err(NdrError::InvalidArrayShape(format!(
                "{} bounds for {} dimensions",
                bounds.len(),
                self.dimensions
            )));
        }
        self.upper_bounds = Some(bounds);
        Ok(self)
    }

    pub fn conformant(mut self) -> Self {
        self.conformant = true;
        self
    }

    pub fn varying(mut self) -> Self {
        self.varying = true;
        self
    }

    pub fn element(&self) -> &TypeDescriptor {
        &self.element
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn upper_bounds(&self) -> Option<&[u32]> {
        self.upper_bounds.as_deref()
    }

    pub fn is_conformant(&self) -> bool {
        self.conformant
    }

    pub fn is_varying(&self) -> bool {
        self.varying
    }

    pub fn alignment(&self) -> usize {
        let element = self.element.alignment();
        if self.conformant || self.varying {
            element.max(4)
        } else {
            element
        }
    }

    /// Lengths to put on the wire for `array`, checked against this shape.
    fn check(&self, array: &ArrayValue) -> Result<()> {
        let dims = array.dims();
        let truncated = dims.last() == Some(&0) && dims.len() < self.dimensions;
        if dims.len() != self.dimensions && !truncated {
            return Err(NdrError::InvalidArrayShape(format!(
                "{}-dimensional value for {}-dimensional array",
                dims.len(),
                self.dimensions
            )));
        }
        if let Some(bounds) = &self.upper_bounds {
            for (&bound, &len) in bounds.iter().zip(dims) {
                if bound as usize != len {
                    return Err(NdrError::ArraySizeMismatch {
                        expected: bound as usize,
                        got: len,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Array contents, flattened row-major.
#[derive(Debug, Clone)]
pub struct ArrayValue {
    dims: Vec<usize>,
    elements: Vec<Value>,
    wire_size: OnceLock<SizeCache>,
}

/// A measured wire size and the shape and flags it was measured under.
#[derive(Debug, Clone)]
struct SizeCache {
    shape: Arc<ArrayShape>,
    flags: Flags,
    size: usize,
}

impl ArrayValue {
    /// One-dimensional array.
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            dims: vec![elements.len()],
            elements,
            wire_size: OnceLock::new(),
        }
    }

    /// Two-dimensional array from equal-length rows.
    ///
    /// No rows yields a single zero dimension; rows of length zero yield
    /// `[rows, 0]`.
    pub fn two_dimensional(rows: Vec<Vec<Value>>) -> Result<Self> {
        let outer = rows.len();
        let inner = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != inner) {
            return Err(NdrError::InvalidArrayShape("ragged rows".to_string()));
        }
        let dims = if outer == 0 { vec![0] } else { vec![outer, inner] };
        Ok(Self::from_parts(dims, rows.into_iter().flatten().collect()))
    }

    fn from_parts(dims: Vec<usize>, elements: Vec<Value>) -> Self {
        Self {
            dims,
            elements,
            wire_size: OnceLock::new(),
        }
    }

    /// Per-dimension lengths, outermost first, ending early at a zero.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut Vec<Value> {
        self.wire_size = OnceLock::new();
        &mut self.elements
    }

    pub fn into_elements(self) -> Vec<Value> {
        self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Rows of a two-dimensional array; a one-dimensional array is one row.
    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        let width = match self.dims.as_slice() {
            [_, inner] => *inner,
            _ => self.elements.len(),
        };
        self.elements.chunks(width.max(1))
    }

    /// Wire size under `shape` and `flags`, measured on first request.
    ///
    /// Only the first (shape, flags) pair is cached; other pairs are
    /// measured every time.
    pub(crate) fn cached_size(
        &self,
        shape: &Arc<ArrayShape>,
        flags: Flags,
        measure: impl FnOnce() -> Result<usize>,
    ) -> Result<usize> {
        if let Some(cache) = self.wire_size.get() {
            if Arc::ptr_eq(&cache.shape, shape) && cache.flags == flags {
                return Ok(cache.size);
            }
            return measure();
        }
        let size = measure()?;
        let _ = self.wire_size.set(SizeCache {
            shape: Arc::clone(shape),
            flags,
            size,
        });
        Ok(size)
    }
}

impl PartialEq for ArrayValue {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims && self.elements == other.elements
    }
}

pub(crate) fn encode<'a, S: WireSink>(
    shape: &'a ArrayShape,
    array: &'a ArrayValue,
    sink: &mut S,
    headers: ArrayHeaders,
    flags: Flags,
) -> Result<()> {
    shape.check(array)?;
    let expected: usize = array.dims().iter().product();
    if expected != array.len() {
        return Err(NdrError::ArraySizeMismatch {
            expected,
            got: array.len(),
        });
    }

    if shape.is_conformant() && headers.conformance {
        put_max_counts(sink, array.dims())?;
    }
    if shape.is_varying() && headers.variance {
        for &len in array.dims() {
            sink.put_u32(0);
            sink.put_u32(count_u32(len)?);
        }
    }

    let mut deferred = DeferredWrites::new();
    encode_dimension(shape, array.dims(), array.elements(), 0, sink, &mut deferred, flags)?;
    codec::flush_writes(sink, &mut deferred, flags)
}

/// Maximum counts, one per dimension.
pub(crate) fn put_max_counts<S: WireSink>(sink: &mut S, dims: &[usize]) -> Result<()> {
    for &len in dims {
        sink.put_u32(count_u32(len)?);
    }
    Ok(())
}

fn encode_dimension<'a, S: WireSink>(
    shape: &'a ArrayShape,
    dims: &[usize],
    elements: &'a [Value],
    dim: usize,
    sink: &mut S,
    deferred: &mut DeferredWrites<'a>,
    flags: Flags,
) -> Result<()> {
    let len = dims[dim];
    if len == 0 {
        return Ok(());
    }
    if dim + 1 == dims.len() {
        for element in elements {
            codec::encode(shape.element(), element, sink, deferred, flags)?;
        }
        return Ok(());
    }
    let stride = elements.len() / len;
    for index in 0..len {
        let slice = &elements[index * stride..(index + 1) * stride];
        encode_dimension(shape, dims, slice, dim + 1, sink, deferred, flags)?;
    }
    Ok(())
}

pub(crate) fn decode<'a>(
    shape: &'a ArrayShape,
    reader: &mut NdrReader,
    headers: ArrayHeaders,
    known_counts: Option<Vec<usize>>,
    flags: Flags,
    ctx: &mut DecodeContext,
) -> Result<ArrayValue> {
    let mut dims = known_counts.unwrap_or_default();
    if shape.is_conformant() && headers.conformance {
        dims = get_max_counts(reader, shape.dimensions())?;
    }
    if shape.is_varying() && headers.variance {
        let wanted = if dims.is_empty() { shape.dimensions() } else { dims.len() };
        let mut actual = Vec::with_capacity(wanted);
        for index in 0..wanted {
            let offset = reader.get_u32()? as usize;
            let count = reader.get_u32()? as usize;
            if let Some(&max) = dims.get(index) {
                if offset.saturating_add(count) > max {
                    return Err(NdrError::ConformanceMismatch {
                        max_count: max as u32,
                        actual_count: count as u32,
                    });
                }
            }
            actual.push(count);
            if count == 0 {
                break;
            }
        }
        dims = actual;
    }
    if dims.is_empty() {
        let bounds = shape.upper_bounds().ok_or(NdrError::MissingArrayBounds)?;
        dims = truncate_at_zero(bounds.iter().map(|&b| b as usize));
    }

    let total = element_count(&dims)?;
    let mut elements = Vec::with_capacity(total.min(reader.remaining()));
    let mut deferred = DeferredReads::new();
    for _ in 0..total {
        elements.push(codec::decode(shape.element(), reader, &mut deferred, flags, ctx)?);
    }
    codec::flush_reads(reader, &mut deferred, flags, ctx)?;
    for element in elements.iter_mut() {
        deferred.resolve(element)?;
    }
    Ok(ArrayValue::from_parts(dims, elements))
}

/// Read up to `dimensions` maximum counts, stopping after a zero.
pub(crate) fn get_max_counts(reader: &mut NdrReader, dimensions: usize) -> Result<Vec<usize>> {
    let mut counts = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let count = reader.get_u32()? as usize;
        counts.push(count);
        if count == 0 {
            break;
        }
    }
    Ok(counts)
}

fn truncate_at_zero(bounds: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut dims = Vec::new();
    for bound in bounds {
        dims.push(bound);
        if bound == 0 {
            break;
        }
    }
    dims
}

fn element_count(dims: &[usize]) -> Result<usize> {
    let total = dims
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .unwrap_or(usize::MAX);
    if total > MAX_NDR_ARRAY_ELEMENTS {
        return Err(NdrError::AllocationLimitExceeded {
            requested: total,
            limit: MAX_NDR_ARRAY_ELEMENTS,
        });
    }
    Ok(total)
}

fn count_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| NdrError::AllocationLimitExceeded {
        requested: len,
        limit: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::NdrWriter;

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::I32).collect()
    }

    fn encode_bytes(shape: &ArrayShape, array: &ArrayValue) -> Vec<u8> {
        let mut w = NdrWriter::new();
        encode(shape, array, &mut w, ArrayHeaders::ALL, Flags::NONE).unwrap();
        w.as_slice().to_vec()
    }

    fn decode_bytes(shape: &ArrayShape, bytes: Vec<u8>) -> ArrayValue {
        let mut r = NdrReader::new(bytes);
        let mut ctx = DecodeContext::new();
        let out = decode(shape, &mut r, ArrayHeaders::ALL, None, Flags::NONE, &mut ctx).unwrap();
        assert_eq!(r.remaining(), 0);
        out
    }

    #[test]
    fn test_conformant_int_array() {
        let shape = ArrayShape::new(TypeDescriptor::I32, 1).unwrap().conformant();
        let array = ArrayValue::new(ints(&[1, 2, 3]));
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(
            bytes,
            vec![3, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]
        );
        assert_eq!(decode_bytes(&shape, bytes), array);
    }

    #[test]
    fn test_conformant_varying_headers() {
        let shape = ArrayShape::new(TypeDescriptor::U16, 1)
            .unwrap()
            .conformant()
            .varying();
        let array = ArrayValue::new(vec![Value::U16(7), Value::U16(8)]);
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(
            bytes,
            vec![2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 7, 0, 8, 0]
        );
        assert_eq!(decode_bytes(&shape, bytes), array);
    }

    #[test]
    fn test_empty_conformant_array() {
        let shape = ArrayShape::new(TypeDescriptor::I32, 1).unwrap().conformant();
        let array = ArrayValue::new(vec![]);
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert_eq!(decode_bytes(&shape, bytes), array);
    }

    #[test]
    fn test_empty_conformant_varying_array() {
        let shape = ArrayShape::new(TypeDescriptor::I64, 1)
            .unwrap()
            .conformant()
            .varying();
        let array = ArrayValue::new(vec![]);
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(bytes, vec![0; 12]);
        let decoded = decode_bytes(&shape, bytes);
        assert!(decoded.is_empty());
        assert_eq!(decoded, array);
    }

    #[test]
    fn test_fixed_array_uses_declared_bounds() {
        let shape = ArrayShape::new(TypeDescriptor::U8, 1)
            .unwrap()
            .with_upper_bounds(vec![3])
            .unwrap();
        let array = ArrayValue::new(vec![Value::U8(1), Value::U8(2), Value::U8(3)]);
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(decode_bytes(&shape, bytes), array);
    }

    #[test]
    fn test_fixed_array_bound_mismatch() {
        let shape = ArrayShape::new(TypeDescriptor::U8, 1)
            .unwrap()
            .with_upper_bounds(vec![4])
            .unwrap();
        let array = ArrayValue::new(vec![Value::U8(1)]);
        let mut w = NdrWriter::new();
        assert!(matches!(
            encode(&shape, &array, &mut w, ArrayHeaders::ALL, Flags::NONE),
            Err(NdrError::ArraySizeMismatch { expected: 4, got: 1 })
        ));
    }

    #[test]
    fn test_two_dimensional_row_major() {
        let shape = ArrayShape::new(TypeDescriptor::I16, 2).unwrap().conformant();
        let array = ArrayValue::two_dimensional(vec![
            vec![Value::I16(1), Value::I16(2), Value::I16(3)],
            vec![Value::I16(4), Value::I16(5), Value::I16(6)],
        ])
        .unwrap();
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(&bytes[..8], &[2, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0]);

        let decoded = decode_bytes(&shape, bytes);
        assert_eq!(decoded, array);
        let rows: Vec<_> = decoded.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], &[Value::I16(4), Value::I16(5), Value::I16(6)][..]);
    }

    #[test]
    fn test_zero_outer_dimension_stops_headers() {
        let shape = ArrayShape::new(TypeDescriptor::I32, 2).unwrap().conformant();
        let array = ArrayValue::two_dimensional(vec![]).unwrap();
        assert_eq!(array.dims(), &[0]);
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert_eq!(decode_bytes(&shape, bytes), array);
    }

    #[test]
    fn test_zero_inner_dimension() {
        let shape = ArrayShape::new(TypeDescriptor::I32, 2).unwrap().conformant();
        let array = ArrayValue::two_dimensional(vec![vec![], vec![], vec![]]).unwrap();
        assert_eq!(array.dims(), &[3, 0]);
        let bytes = encode_bytes(&shape, &array);
        assert_eq!(bytes, vec![3, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_bytes(&shape, bytes), array);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = ArrayValue::two_dimensional(vec![vec![Value::U8(1)], vec![]]);
        assert!(matches!(result, Err(NdrError::InvalidArrayShape(_))));
    }

    #[test]
    fn test_invalid_dimension_counts() {
        assert!(ArrayShape::new(TypeDescriptor::U8, 0).is_err());
        assert!(ArrayShape::new(TypeDescriptor::U8, 3).is_err());
        assert!(ArrayShape::new(TypeDescriptor::U8, 2)
            .unwrap()
            .with_upper_bounds(vec![1])
            .is_err());
    }

    #[test]
    fn test_missing_bounds() {
        let shape = ArrayShape::new(TypeDescriptor::U8, 1).unwrap();
        let mut r = NdrReader::new(vec![1u8]);
        let mut ctx = DecodeContext::new();
        assert!(matches!(
            decode(&shape, &mut r, ArrayHeaders::ALL, None, Flags::NONE, &mut ctx),
            Err(NdrError::MissingArrayBounds)
        ));
    }

    #[test]
    fn test_huge_conformance_rejected() {
        let shape = ArrayShape::new(TypeDescriptor::U8, 2).unwrap().conformant();
        let mut r = NdrReader::new(vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let mut ctx = DecodeContext::new();
        assert!(matches!(
            decode(&shape, &mut r, ArrayHeaders::ALL, None, Flags::NONE, &mut ctx),
            Err(NdrError::AllocationLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_varying_count_beyond_max() {
        let shape = ArrayShape::new(TypeDescriptor::U8, 1)
            .unwrap()
            .conformant()
            .varying();
        let mut r = NdrReader::new(vec![1, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0]);
        let mut ctx = DecodeContext::new();
        assert!(matches!(
            decode(&shape, &mut r, ArrayHeaders::ALL, None, Flags::NONE, &mut ctx),
            Err(NdrError::ConformanceMismatch { .. })
        ));
    }
}
