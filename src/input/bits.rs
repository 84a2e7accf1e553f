//! MSB-first bit cursors over byte sources.

use crate::error::Result;
use std::io::Read;

/// Reads arbitrary-width, big-endian bit fields from a byte source.
///
/// One byte is buffered at a time: reads which straddle byte boundaries pull
/// from the source as needed. Exhausting the source mid-field is reported as
/// an unexpected EOF.
#[derive(Debug)]
pub struct BitReader<R> {
    inner: R,
    current: u8,
    bits_left: u32,
}

/// A [`BitReader`] over an in-memory buffer.
pub type BitBufferReader<'a> = BitReader<&'a [u8]>;

impl<R: Read> BitReader<R> {
    /// Create a bit reader positioned at the next byte of `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            current: 0,
            bits_left: 0,
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.inner.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Consume the next `bits` bits (at most 64) as an unsigned value.
    pub fn as_long(&mut self, bits: u32) -> Result<u64> {
        debug_assert!(bits <= 64);

        let mut value = 0u64;
        let mut remaining = bits;

        while remaining > 0 {
            if self.bits_left == 0 {
                self.current = self.next_byte()?;
                self.bits_left = 8;
            }

            let take = remaining.min(self.bits_left);
            let shift = self.bits_left - take;
            let chunk = (u64::from(self.current) >> shift) & ((1u64 << take) - 1);

            value = (value << take) | chunk;

            self.bits_left -= take;
            remaining -= take;
        }

        Ok(value)
    }

    /// Consume the next `bits` bits (at most 32) as an unsigned value.
    pub fn as_integer(&mut self, bits: u32) -> Result<u32> {
        debug_assert!(bits <= 32);
        Ok(self.as_long(bits)? as u32)
    }

    /// Consume the next `bits` bits (at most 64), sign-extending from bit `bits - 1`.
    pub fn as_signed_long(&mut self, bits: u32) -> Result<i64> {
        if bits == 0 {
            return Ok(0);
        }

        let value = self.as_long(bits)?;
        let shift = 64 - bits;

        Ok(((value << shift) as i64) >> shift)
    }

    /// Consume the next `bits` bits (at most 32), sign-extending from bit `bits - 1`.
    pub fn as_signed_integer(&mut self, bits: u32) -> Result<i32> {
        debug_assert!(bits <= 32);
        Ok(self.as_signed_long(bits)? as i32)
    }

    /// Consume bits up to and including the next set bit, returning the number of zeroes seen.
    pub fn read_all_zeroes(&mut self) -> Result<u32> {
        let mut count = 0;

        loop {
            if self.bits_left == 0 {
                self.current = self.next_byte()?;
                self.bits_left = 8;
            }

            // Fast path over whole zero bytes.
            let visible = self.current & (((1u16 << self.bits_left) - 1) as u8);
            if visible == 0 {
                count += self.bits_left;
                self.bits_left = 0;
                continue;
            }

            let top = 7 - visible.leading_zeros();
            count += self.bits_left - 1 - top;
            self.bits_left = top;

            return Ok(count);
        }
    }

    /// Discard any bits remaining in the current byte, realigning to the source.
    pub fn read_remaining_bits(&mut self) {
        self.bits_left = 0;
    }

    /// Whether this reader is positioned on a byte boundary.
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.bits_left == 0
    }

    /// Access the underlying byte source.
    ///
    /// Reads made directly from the source skip any partially consumed byte.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume this reader, returning the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_byte_boundaries() {
        let data = [0b1010_1100, 0b0101_0011, 0xFF];
        let mut reader = BitBufferReader::new(&data[..]);

        assert_eq!(reader.as_integer(3).unwrap(), 0b101);
        assert_eq!(reader.as_integer(7).unwrap(), 0b0_1100_01);
        assert_eq!(reader.as_integer(6).unwrap(), 0b01_0011);
        assert_eq!(reader.as_long(8).unwrap(), 0xFF);
        assert!(reader.as_integer(1).unwrap_err().is_eof());
    }

    #[test]
    fn reads_full_width_values() {
        let data = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x80];
        let mut reader = BitBufferReader::new(&data[..]);

        assert_eq!(reader.as_long(64).unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(reader.as_integer(1).unwrap(), 1);
    }

    #[test]
    fn sign_extension() {
        let data = [0b1110_0111, 0b1000_0000];
        let mut reader = BitBufferReader::new(&data[..]);

        assert_eq!(reader.as_signed_integer(3).unwrap(), -1);
        assert_eq!(reader.as_signed_integer(5).unwrap(), 7);
        assert_eq!(reader.as_signed_integer(0).unwrap(), 0);
        assert_eq!(reader.as_signed_long(8).unwrap(), -128);
    }

    #[test]
    fn unary_zero_runs() {
        // 0001 | 1 | 0000 0000 0001 | 01 -> 3, 0, 11, 1
        let data = [0b0001_1000, 0b0000_0000, 0b1010_0000];
        let mut reader = BitBufferReader::new(&data[..]);

        assert_eq!(reader.read_all_zeroes().unwrap(), 3);
        assert_eq!(reader.read_all_zeroes().unwrap(), 0);
        assert_eq!(reader.read_all_zeroes().unwrap(), 11);
        assert_eq!(reader.read_all_zeroes().unwrap(), 1);
        assert_eq!(reader.as_integer(5).unwrap(), 0);
    }

    #[test]
    fn realigns_to_next_byte() {
        let data = [0b1000_0000, 0xAB];
        let mut reader = BitBufferReader::new(&data[..]);

        assert_eq!(reader.as_integer(1).unwrap(), 1);
        assert!(!reader.is_aligned());
        reader.read_remaining_bits();
        assert_eq!(reader.as_integer(8).unwrap(), 0xAB);
    }
}
