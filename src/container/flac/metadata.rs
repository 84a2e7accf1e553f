use crate::{
    constants::{signatures, UNKNOWN_U64},
    container::{
        util::{check_next_bytes, read_vec, samples_to_ms},
        vorbis_comment::VorbisComments,
    },
    error::{DemuxError, Result},
    input::{bits::BitBufferReader, SeekableStream},
};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;
use tracing::trace;

const STREAM_INFO_LEN: usize = 34;

const BLOCK_STREAM_INFO: u8 = 0;
const BLOCK_SEEK_TABLE: u8 = 3;
const BLOCK_VORBIS_COMMENT: u8 = 4;

const SEEK_POINT_LEN: u32 = 18;

/// Contents of the mandatory `STREAMINFO` block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    /// Smallest block size (in samples) used in the stream.
    pub min_block_size: u16,
    /// Largest block size (in samples) used in the stream.
    pub max_block_size: u16,
    /// Smallest frame size (in bytes), or 0 if unknown.
    pub min_frame_size: u32,
    /// Largest frame size (in bytes), or 0 if unknown.
    pub max_frame_size: u32,
    /// Sample rate, in Hz.
    pub sample_rate: u32,
    /// Number of channels (1 to 8).
    pub channels: u8,
    /// Bits per sample (4 to 32).
    pub bits_per_sample: u8,
    /// Number of samples per channel, or 0 if unknown.
    pub total_samples: u64,
    /// MD5 checksum of the decoded audio.
    pub md5: [u8; 16],
}

impl StreamInfo {
    /// Parses the 34-byte body of a `STREAMINFO` block.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < STREAM_INFO_LEN {
            return Err(DemuxError::malformed("STREAMINFO block too short"));
        }

        let mut bits = BitBufferReader::new(body);

        let min_block_size = bits.as_integer(16)? as u16;
        let max_block_size = bits.as_integer(16)? as u16;
        let min_frame_size = bits.as_integer(24)?;
        let max_frame_size = bits.as_integer(24)?;
        let sample_rate = bits.as_integer(20)?;
        let channels = bits.as_integer(3)? as u8 + 1;
        let bits_per_sample = bits.as_integer(5)? as u8 + 1;
        let total_samples = bits.as_long(36)?;

        let mut md5 = [0u8; 16];
        bits.get_mut().read_exact(&mut md5)?;

        if sample_rate == 0 || max_block_size < 16 || bits_per_sample < 4 {
            return Err(DemuxError::malformed("invalid STREAMINFO block"));
        }

        Ok(Self {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sample_rate,
            channels,
            bits_per_sample,
            total_samples,
            md5,
        })
    }

    /// Duration of the stream in milliseconds, if the sample count is known.
    #[must_use]
    pub fn length_ms(&self) -> Option<u64> {
        if self.total_samples == 0 {
            None
        } else {
            Some(samples_to_ms(self.total_samples, u64::from(self.sample_rate)))
        }
    }
}

/// An entry of the `SEEKTABLE` block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeekPoint {
    /// Index of the first sample in the target frame.
    pub sample_index: u64,
    /// Offset of the target frame, relative to the first frame.
    pub byte_offset: u64,
    /// Number of samples in the target frame.
    pub samples: u16,
}

/// Everything read from the metadata blocks of a native FLAC stream.
#[derive(Clone, Debug)]
pub struct FlacMetadata {
    /// Stream parameters.
    pub stream_info: StreamInfo,
    /// Seek points, sorted by sample index, with placeholders removed.
    pub seek_points: Vec<SeekPoint>,
    /// Vorbis comments, if present.
    pub(crate) tags: Option<VorbisComments>,
    /// Absolute offset of the first audio frame.
    pub first_frame_offset: u64,
}

impl FlacMetadata {
    /// Reads the `fLaC` marker and all metadata blocks.
    ///
    /// The stream is left positioned at the first frame.
    pub fn read(stream: &mut dyn SeekableStream) -> Result<Self> {
        if !check_next_bytes(stream, signatures::FLAC)? {
            return Err(DemuxError::malformed("missing fLaC marker"));
        }

        let (last, kind, len) = read_block_header(stream)?;
        if kind != BLOCK_STREAM_INFO {
            return Err(DemuxError::malformed("first metadata block is not STREAMINFO"));
        }

        let body = read_vec(stream, u64::from(len))?;
        let stream_info = StreamInfo::parse(&body)?;

        let mut out = Self {
            stream_info,
            seek_points: Vec::new(),
            tags: None,
            first_frame_offset: 0,
        };

        let mut last = last;
        while !last {
            let (is_last, kind, len) = read_block_header(stream)?;
            last = is_last;

            trace!("FLAC metadata block type {}, {} bytes.", kind, len);

            match kind {
                BLOCK_SEEK_TABLE => out.seek_points = read_seek_table(stream, len)?,
                BLOCK_VORBIS_COMMENT => {
                    let body = read_vec(stream, u64::from(len))?;
                    out.tags = Some(VorbisComments::parse(&body)?);
                },
                BLOCK_STREAM_INFO => {
                    return Err(DemuxError::malformed("repeated STREAMINFO block"));
                },
                _ => stream.skip_fully(u64::from(len))?,
            }
        }

        out.first_frame_offset = stream.position();

        Ok(out)
    }

    /// Finds the last seek point at or before `sample`.
    #[must_use]
    pub fn seek_point_for(&self, sample: u64) -> Option<SeekPoint> {
        let index = self
            .seek_points
            .partition_point(|point| point.sample_index <= sample);

        index.checked_sub(1).map(|i| self.seek_points[i])
    }
}

fn read_block_header(stream: &mut dyn SeekableStream) -> Result<(bool, u8, u32)> {
    let flags = stream.read_u8()?;
    let len = stream.read_u24::<BigEndian>()?;

    Ok((flags & 0x80 != 0, flags & 0x7F, len))
}

fn read_seek_table(stream: &mut dyn SeekableStream, len: u32) -> Result<Vec<SeekPoint>> {
    let count = len / SEEK_POINT_LEN;
    let mut points = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let sample_index = stream.read_u64::<BigEndian>()?;
        let byte_offset = stream.read_u64::<BigEndian>()?;
        let samples = stream.read_u16::<BigEndian>()?;

        if sample_index != UNKNOWN_U64 {
            points.push(SeekPoint {
                sample_index,
                byte_offset,
                samples,
            });
        }
    }

    stream.skip_fully(u64::from(len % SEEK_POINT_LEN))?;
    points.sort_by_key(|point| point.sample_index);

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, test_utils, Config};

    fn info() -> test_utils::FlacInfo {
        test_utils::FlacInfo {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
            block_size: 4096,
            total_samples: 441_000,
        }
    }

    #[test]
    fn parses_stream_info() {
        let body = test_utils::flac_stream_info(&info());
        let parsed = StreamInfo::parse(&body).unwrap();

        assert_eq!(parsed.sample_rate, 44_100);
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.bits_per_sample, 16);
        assert_eq!(parsed.max_block_size, 4096);
        assert_eq!(parsed.total_samples, 441_000);
        assert_eq!(parsed.length_ms(), Some(10_000));
    }

    #[test]
    fn reads_blocks_and_skips_unknown() {
        let points = [(0, 0), (44_100, 1000), (u64::MAX, 0), (88_200, 2000)];
        let tags = [("TITLE", "Tune")];
        let header = test_utils::flac_header(&info(), &points, Some(&tags[..]), true);
        let len = header.len() as u64;

        let mut data = header;
        data.extend_from_slice(&[0xFF, 0xF8]);

        let mut stream = SourceStream::from_memory(data, &Config::default());
        let meta = FlacMetadata::read(&mut stream).unwrap();

        assert_eq!(meta.first_frame_offset, len);
        assert_eq!(meta.seek_points.len(), 3);
        assert_eq!(meta.tags.unwrap().get("title"), Some("Tune"));
    }

    #[test]
    fn seek_point_lookup() {
        let points = [(0, 0), (44_100, 1000), (88_200, 2000)];
        let header = test_utils::flac_header(&info(), &points, None, false);
        let mut stream = SourceStream::from_memory(header, &Config::default());
        let meta = FlacMetadata::read(&mut stream).unwrap();

        assert_eq!(meta.seek_point_for(0).unwrap().byte_offset, 0);
        assert_eq!(meta.seek_point_for(50_000).unwrap().byte_offset, 1000);
        assert_eq!(meta.seek_point_for(1_000_000).unwrap().byte_offset, 2000);
    }
}
