use super::{
    metadata::StreamInfo,
    subframe::{decorrelate, read_subframe, ChannelAssignment},
};
use crate::{
    error::{DemuxError, Result},
    input::bits::BitReader,
};
use std::io::Read;
use tracing::trace;

/// Fields of a frame header which affect decoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Samples per channel in this frame.
    pub block_size: usize,
    /// Sample rate of this frame, in Hz.
    pub sample_rate: u32,
    /// Channel coding of this frame.
    pub assignment: ChannelAssignment,
    /// Bits per (non-side) sample.
    pub bits_per_sample: u32,
    /// Index of the first sample in this frame.
    pub first_sample: u64,
}

/// A frame decoded to 16-bit PCM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedFrame {
    /// Index of the first sample in this frame.
    pub first_sample: u64,
    /// Interleaved samples.
    pub samples: Vec<i16>,
}

/// Decodes FLAC frames for a stream with fixed parameters.
pub struct FrameDecoder {
    info: StreamInfo,
    channels: Vec<Vec<i32>>,
}

impl FrameDecoder {
    /// Create a decoder for a stream described by `info`.
    #[must_use]
    pub fn new(info: StreamInfo) -> Self {
        Self {
            info,
            channels: vec![Vec::new(); usize::from(info.channels)],
        }
    }

    /// The stream parameters this decoder was created with.
    #[must_use]
    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    /// Scans for the next frame sync, then decodes that frame.
    ///
    /// Candidate syncs with invalid headers are skipped. Returns `None` if the
    /// source ends before another frame begins.
    pub fn next_frame<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<DecodedFrame>> {
        loop {
            let second = match find_sync(reader)? {
                Some(b) => b,
                None => return Ok(None),
            };

            let mut bits = BitReader::new(&mut *reader);

            match self.read_header(&mut bits, second)? {
                Some(header) => return self.read_body(&mut bits, &header).map(Some),
                None => trace!("Skipping false FLAC frame sync."),
            }
        }
    }

    /// Parses a frame header, whose two sync bytes have already been consumed.
    ///
    /// Returns `None` if the header is invalid, or does not match the stream.
    fn read_header<R: Read>(
        &self,
        bits: &mut BitReader<R>,
        second_sync_byte: u8,
    ) -> Result<Option<FrameHeader>> {
        let variable_blocking = second_sync_byte & 1 == 1;

        let block_code = bits.as_integer(4)?;
        let rate_code = bits.as_integer(4)?;
        let channel_code = bits.as_integer(4)?;
        let size_code = bits.as_integer(3)?;
        let reserved = bits.as_integer(1)?;

        let number = match read_coded_number(bits)? {
            Some(n) => n,
            None => return Ok(None),
        };

        let block_size = match block_code {
            0 => return Ok(None),
            1 => 192,
            2..=5 => 576 << (block_code - 2),
            6 => bits.as_integer(8)? + 1,
            7 => bits.as_integer(16)? + 1,
            _ => 256 << (block_code - 8),
        } as usize;

        let sample_rate = match rate_code {
            0 => self.info.sample_rate,
            1 => 88_200,
            2 => 176_400,
            3 => 192_000,
            4 => 8000,
            5 => 16_000,
            6 => 22_050,
            7 => 24_000,
            8 => 32_000,
            9 => 44_100,
            10 => 48_000,
            11 => 96_000,
            12 => bits.as_integer(8)? * 1000,
            13 => bits.as_integer(16)?,
            14 => bits.as_integer(16)? * 10,
            _ => return Ok(None),
        };

        let bits_per_sample = match size_code {
            0 => u32::from(self.info.bits_per_sample),
            1 => 8,
            2 => 12,
            4 => 16,
            5 => 20,
            6 => 24,
            7 => 32,
            _ => return Ok(None),
        };

        let _crc8 = bits.as_integer(8)?;

        let assignment = match ChannelAssignment::from_code(channel_code) {
            Some(a) => a,
            None => return Ok(None),
        };

        if reserved != 0
            || assignment.channel_count() != self.info.channels
            || sample_rate != self.info.sample_rate
            || bits_per_sample != u32::from(self.info.bits_per_sample)
            || block_size > usize::from(self.info.max_block_size)
        {
            return Ok(None);
        }

        let first_sample = if variable_blocking {
            number
        } else {
            number * u64::from(self.info.max_block_size)
        };

        Ok(Some(FrameHeader {
            block_size,
            sample_rate,
            assignment,
            bits_per_sample,
            first_sample,
        }))
    }

    fn read_body<R: Read>(
        &mut self,
        bits: &mut BitReader<R>,
        header: &FrameHeader,
    ) -> Result<DecodedFrame> {
        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.resize(header.block_size, 0);
            let bps = header.bits_per_sample + header.assignment.extra_bits(index);
            read_subframe(bits, bps, channel)?;
        }

        if let [first, second] = &mut self.channels[..] {
            decorrelate(header.assignment, first, second);
        }

        bits.read_remaining_bits();
        let _crc16 = bits.as_integer(16)?;

        Ok(DecodedFrame {
            first_sample: header.first_sample,
            samples: interleave(&self.channels, header.block_size, header.bits_per_sample),
        })
    }

    /// Decodes a single frame held entirely in `packet`, as in FLAC-in-Ogg.
    pub fn decode_packet(&mut self, packet: &[u8]) -> Result<DecodedFrame> {
        let mut reader = packet;
        self.next_frame(&mut reader)?
            .ok_or_else(|| DemuxError::malformed("packet holds no FLAC frame"))
    }
}

/// Reads bytes until the 14-bit frame sync code (`0xFFF8` after masking) is found.
///
/// Returns the second sync byte, which carries the blocking strategy bit.
fn find_sync<R: Read + ?Sized>(reader: &mut R) -> Result<Option<u8>> {
    let mut previous = 0u8;
    let mut byte = [0u8; 1];

    loop {
        if reader.read(&mut byte)? == 0 {
            return Ok(None);
        }

        if previous == 0xFF && byte[0] & 0xFC == 0xF8 {
            return Ok(Some(byte[0]));
        }

        previous = byte[0];
    }
}

/// Reads a frame or sample number coded like (extended) UTF-8.
fn read_coded_number<R: Read>(bits: &mut BitReader<R>) -> Result<Option<u64>> {
    let first = bits.as_integer(8)? as u8;
    let ones = first.leading_ones();

    if ones == 0 {
        return Ok(Some(u64::from(first)));
    }

    if ones == 1 || ones > 7 {
        return Ok(None);
    }

    let mut value = u64::from(first & (0x7F >> ones));

    for _ in 1..ones {
        let next = bits.as_integer(8)? as u8;
        if next & 0xC0 != 0x80 {
            return Ok(None);
        }
        value = (value << 6) | u64::from(next & 0x3F);
    }

    Ok(Some(value))
}

/// Interleaves channels, shifting every sample to a 16-bit width.
fn interleave(channels: &[Vec<i32>], block_size: usize, bits_per_sample: u32) -> Vec<i16> {
    let mut out = Vec::with_capacity(block_size * channels.len());

    for i in 0..block_size {
        for channel in channels {
            let s = channel[i];
            let s = if bits_per_sample > 16 {
                s >> (bits_per_sample - 16)
            } else {
                s << (16 - bits_per_sample)
            };
            out.push(s as i16);
        }
    }

    out
}
