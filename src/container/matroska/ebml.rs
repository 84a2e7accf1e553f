//! EBML element headers, variable-length integers, and payload readers.

use crate::{
    container::util::read_vec,
    error::{DemuxError, Result},
    input::SeekableStream,
    tree::{TreeNode, TreeReader},
};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::ErrorKind as IoErrorKind;
use tracing::trace;

/// Longest element id accepted, in bytes.
const MAX_ID_LEN: u32 = 4;
/// Longest element size accepted, in bytes.
const MAX_SIZE_LEN: u32 = 8;

/// How the bits of a variable-length integer are interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VarIntKind {
    /// Unsigned value with the length marker removed.
    Unsigned,
    /// Two's complement over the `7 * len` value bits.
    Signed,
    /// Unsigned value minus the bias `2^(7 * len - 1) - 1`, as used by EBML lacing.
    LaceSigned,
}

/// Number of bytes in a variable-length integer, from its first byte.
#[must_use]
pub fn vint_len(first: u8) -> Option<u32> {
    if first == 0 {
        None
    } else {
        Some(first.leading_zeros() + 1)
    }
}

/// Interprets the raw (marker-stripped) value of a `len`-byte integer.
#[must_use]
pub fn interpret_vint(raw: u64, len: u32, kind: VarIntKind) -> i64 {
    let bits = 7 * len;

    match kind {
        VarIntKind::Unsigned => raw as i64,
        VarIntKind::Signed => {
            let shift = 64 - bits;
            ((raw << shift) as i64) >> shift
        },
        VarIntKind::LaceSigned => raw as i64 - ((1i64 << (bits - 1)) - 1),
    }
}

/// Decodes a variable-length integer from the start of `buf`.
///
/// Returns the value and the number of bytes it occupied.
#[must_use]
pub fn decode_vint(buf: &[u8], kind: VarIntKind) -> Option<(i64, usize)> {
    let first = *buf.first()?;
    let len = vint_len(first)?;
    let bytes = buf.get(..len as usize)?;

    let mut raw = u64::from(first) & (0xFF >> len);
    for &b in &bytes[1..] {
        raw = (raw << 8) | u64::from(b);
    }

    Some((interpret_vint(raw, len, kind), len as usize))
}

/// Encodes `value` as a variable-length integer of exactly `len` bytes.
///
/// Returns `None` if the value does not fit (or, for unsigned values, would
/// collide with the reserved all-ones pattern).
#[must_use]
pub fn encode_vint(value: i64, len: u32, kind: VarIntKind) -> Option<Vec<u8>> {
    if !(1..=8).contains(&len) {
        return None;
    }

    let bits = 7 * len;
    let mask = (1u64 << bits) - 1;

    let raw = match kind {
        VarIntKind::Unsigned => {
            if value < 0 || value as u64 >= mask {
                return None;
            }
            value as u64
        },
        VarIntKind::Signed => {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if value < min || value > max {
                return None;
            }
            value as u64 & mask
        },
        VarIntKind::LaceSigned => {
            let bias = (1i64 << (bits - 1)) - 1;
            let raw = value.checked_add(bias)?;
            if raw < 0 || raw as u64 >= mask {
                return None;
            }
            raw as u64
        },
    };

    let marked = raw | (1u64 << bits);
    let bytes = marked.to_be_bytes();
    Some(bytes[8 - len as usize..].to_vec())
}

/// Reads an element id, keeping its length marker (as ids are conventionally written).
fn read_id(stream: &mut dyn SeekableStream) -> Result<Option<u32>> {
    let first = match stream.read_u8() {
        Ok(b) => b,
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = match vint_len(first) {
        Some(len) if len <= MAX_ID_LEN => len,
        _ => return Err(DemuxError::malformed("invalid EBML element id")),
    };

    let mut id = u32::from(first);
    for _ in 1..len {
        id = (id << 8) | u32::from(stream.read_u8()?);
    }

    Ok(Some(id))
}

/// Reads an element size, where `None` marks an unknown size.
fn read_size(stream: &mut dyn SeekableStream) -> Result<Option<u64>> {
    let first = stream.read_u8()?;

    let len = match vint_len(first) {
        Some(len) if len <= MAX_SIZE_LEN => len,
        _ => return Err(DemuxError::malformed("invalid EBML element size")),
    };

    let mut raw = u64::from(first) & (0xFF >> len);
    for _ in 1..len {
        raw = (raw << 8) | u64::from(stream.read_u8()?);
    }

    let unknown = (1u64 << (7 * len)) - 1;
    Ok(if raw == unknown { None } else { Some(raw) })
}

/// Cursor describing one element: header position and payload extent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EbmlElement {
    /// Element id, including its length marker.
    pub id: u32,
    /// Offset of the element header.
    pub offset: u64,
    /// Offset of the element payload.
    pub data_offset: u64,
    /// Payload length, if known.
    pub size: Option<u64>,
}

impl EbmlElement {
    /// A synthetic element covering `[start, end)`, used as the root of a walk.
    #[must_use]
    pub fn root(start: u64, end: Option<u64>) -> Self {
        Self {
            id: 0,
            offset: start,
            data_offset: start,
            size: end.map(|end| end.saturating_sub(start)),
        }
    }

    /// Offset of the byte following this element, if its size is known.
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.size.map(|size| self.data_offset + size)
    }

    /// Length of the id and size fields.
    #[must_use]
    pub fn header_len(&self) -> u64 {
        self.data_offset - self.offset
    }
}

impl TreeNode for EbmlElement {
    type Tag = u32;

    fn tag(&self) -> u32 {
        self.id
    }
}

/// Reads EBML elements from a stream.
pub struct EbmlReader<'a> {
    stream: &'a mut dyn SeekableStream,
}

impl<'a> EbmlReader<'a> {
    /// Wrap a stream positioned at an element header.
    pub fn new(stream: &'a mut dyn SeekableStream) -> Self {
        Self { stream }
    }

    /// The underlying stream.
    pub fn stream(&mut self) -> &mut dyn SeekableStream {
        &mut *self.stream
    }

    /// Current position of the underlying stream.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    /// Reads the next element header, or `None` at the end of the stream.
    pub fn read_element(&mut self) -> Result<Option<EbmlElement>> {
        let offset = self.stream.position();

        let id = match read_id(&mut *self.stream)? {
            Some(id) => id,
            None => return Ok(None),
        };
        let size = read_size(&mut *self.stream)?;

        let element = EbmlElement {
            id,
            offset,
            data_offset: self.stream.position(),
            size,
        };

        trace!("EBML element {:#x} at {}, size {:?}.", id, offset, size);

        Ok(Some(element))
    }

    /// Moves to the payload of `element`.
    pub fn seek_to_data(&mut self, element: &EbmlElement) -> Result<()> {
        self.stream.seek(element.data_offset)
    }

    fn sized_payload(element: &EbmlElement, max: u64) -> Result<u64> {
        match element.size {
            Some(size) if size <= max => Ok(size),
            _ => Err(DemuxError::malformed_owned(format!(
                "EBML element {:#x} has an invalid size for its type",
                element.id
            ))),
        }
    }

    /// Reads the payload of `element` as a big-endian unsigned integer.
    pub fn read_uint(&mut self, element: &EbmlElement) -> Result<u64> {
        let size = Self::sized_payload(element, 8)?;
        let mut value = 0u64;

        for _ in 0..size {
            value = (value << 8) | u64::from(self.stream.read_u8()?);
        }

        Ok(value)
    }

    /// Reads the payload of `element` as a big-endian signed integer.
    pub fn read_int(&mut self, element: &EbmlElement) -> Result<i64> {
        let size = Self::sized_payload(element, 8)?;
        let value = self.read_uint(element)?;

        Ok(if size == 0 {
            0
        } else {
            let shift = 64 - 8 * size;
            ((value << shift) as i64) >> shift
        })
    }

    /// Reads the payload of `element` as a 4- or 8-byte float (or 0 if empty).
    pub fn read_float(&mut self, element: &EbmlElement) -> Result<f64> {
        match Self::sized_payload(element, 8)? {
            0 => Ok(0.0),
            4 => Ok(f64::from(self.stream.read_f32::<BigEndian>()?)),
            8 => Ok(self.stream.read_f64::<BigEndian>()?),
            _ => Err(DemuxError::malformed("EBML float must have 4 or 8 bytes")),
        }
    }

    /// Reads the payload of `element` as raw bytes.
    pub fn read_binary(&mut self, element: &EbmlElement) -> Result<Vec<u8>> {
        let size = Self::sized_payload(element, u64::MAX)?;
        read_vec(&mut *self.stream, size)
    }

    /// Reads the payload of `element` as a string, dropping any trailing NULs.
    pub fn read_string(&mut self, element: &EbmlElement) -> Result<String> {
        let raw = self.read_binary(element)?;
        Ok(crate::container::util::text(&raw))
    }
}

impl TreeReader for EbmlReader<'_> {
    type Node = EbmlElement;

    fn next_child(&mut self, parent: &EbmlElement) -> Result<Option<EbmlElement>> {
        if let Some(end) = parent.end() {
            if self.stream.position() >= end {
                return Ok(None);
            }
        }

        self.read_element()
    }

    fn skip(&mut self, element: &EbmlElement) -> Result<()> {
        match element.end() {
            Some(end) => self.stream.seek(end),
            None => Err(DemuxError::malformed("cannot skip an EBML element of unknown size")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, test_utils, Config};

    #[test]
    fn unsigned_and_signed_round_trip_at_every_length() {
        for len in 1..=8u32 {
            let bits = 7 * len;
            let max_unsigned = ((1u64 << bits) - 2) as i64;
            let max_signed = (1i64 << (bits - 1)) - 1;
            let min_signed = -(1i64 << (bits - 1));

            for &value in &[0, 1, max_unsigned / 3, max_unsigned] {
                let bytes = encode_vint(value, len, VarIntKind::Unsigned).unwrap();
                assert_eq!(bytes.len(), len as usize);
                assert_eq!(decode_vint(&bytes, VarIntKind::Unsigned), Some((value, len as usize)));
            }

            for &value in &[min_signed, -1, 0, 1, max_signed] {
                let bytes = encode_vint(value, len, VarIntKind::Signed).unwrap();
                assert_eq!(decode_vint(&bytes, VarIntKind::Signed), Some((value, len as usize)));
            }
        }
    }

    #[test]
    fn lace_bias_per_length() {
        // A raw value of zero decodes to minus the bias.
        assert_eq!(interpret_vint(0, 1, VarIntKind::LaceSigned), -63);
        assert_eq!(interpret_vint(0, 2, VarIntKind::LaceSigned), -8191);
        assert_eq!(interpret_vint(0, 3, VarIntKind::LaceSigned), -1_048_575);
        assert_eq!(interpret_vint(0, 4, VarIntKind::LaceSigned), -134_217_727);

        let bytes = encode_vint(-5, 2, VarIntKind::LaceSigned).unwrap();
        assert_eq!(decode_vint(&bytes, VarIntKind::LaceSigned), Some((-5, 2)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_eq!(encode_vint(127, 1, VarIntKind::Unsigned), None);
        assert_eq!(encode_vint(64, 1, VarIntKind::Signed), None);
        assert_eq!(encode_vint(1, 9, VarIntKind::Unsigned), None);
        assert_eq!(decode_vint(&[0], VarIntKind::Unsigned), None);
    }

    #[test]
    fn reads_headers_and_payloads() {
        let mut bytes = test_utils::ebml_element(0x4282, b"webm");
        bytes.extend(test_utils::ebml_element(0x2AD7B1, &[0x0F, 0x42, 0x40]));
        bytes.extend(test_utils::ebml_element(0x4489, &1234.5f64.to_be_bytes()));
        bytes.extend(test_utils::ebml_unknown_size(0x1F43B675));

        let mut stream = SourceStream::from_memory(bytes, &Config::default());
        let mut reader = EbmlReader::new(&mut stream);

        let doc_type = reader.read_element().unwrap().unwrap();
        assert_eq!(doc_type.id, 0x4282);
        assert_eq!(reader.read_string(&doc_type).unwrap(), "webm");

        let scale = reader.read_element().unwrap().unwrap();
        assert_eq!(reader.read_uint(&scale).unwrap(), 1_000_000);

        let duration = reader.read_element().unwrap().unwrap();
        assert_eq!(reader.read_float(&duration).unwrap(), 1234.5);

        let cluster = reader.read_element().unwrap().unwrap();
        assert_eq!(cluster.id, 0x1F43B675);
        assert_eq!(cluster.size, None);
        assert!(reader.skip(&cluster).is_err());

        assert_eq!(reader.read_element().unwrap(), None);
    }

    #[test]
    fn signed_payloads() {
        let bytes = test_utils::ebml_element(0xFB, &[0xFF, 0x38]);
        let mut stream = SourceStream::from_memory(bytes, &Config::default());
        let mut reader = EbmlReader::new(&mut stream);

        let element = reader.read_element().unwrap().unwrap();
        assert_eq!(reader.read_int(&element).unwrap(), -200);
    }
}
