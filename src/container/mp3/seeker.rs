use super::frame::FrameHeader;
use crate::container::util::samples_to_ms;
use byteorder::{BigEndian, ByteOrder};

const XING_FRAMES: u32 = 0x01;
const XING_BYTES: u32 = 0x02;
const XING_TOC: u32 = 0x04;
const XING_REQUIRED: u32 = XING_FRAMES | XING_BYTES | XING_TOC;

const TOC_LEN: usize = 100;

/// Whether a frame holds a Xing, Info, or LAME tag rather than audio.
#[must_use]
pub fn is_tag_frame(header: &FrameHeader, frame: &[u8]) -> bool {
    let offset = header.xing_offset();
    matches!(
        frame.get(offset..offset + 4),
        Some(b"Xing") | Some(b"Info") | Some(b"LAME")
    )
}

/// Seeking by the percentile table of a Xing (or Info) VBR header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XingSeeker {
    data_start: u64,
    data_len: u64,
    frame_count: u64,
    samples_per_frame: u32,
    sample_rate: u32,
    toc: Vec<u8>,
}

impl XingSeeker {
    /// Reads the Xing header from the first frame of a stream.
    ///
    /// `data_start` is the offset of the first frame following the tag frame.
    /// Returns `None` unless the frame and byte counts and the table are all present.
    #[must_use]
    pub fn from_frame(
        header: &FrameHeader,
        frame: &[u8],
        data_start: u64,
        content_length: Option<u64>,
    ) -> Option<Self> {
        let offset = header.xing_offset();
        let tag = frame.get(offset..offset + 4)?;

        if tag != b"Xing" && tag != b"Info" {
            return None;
        }

        let fields = frame.get(offset + 4..)?;
        let flags = BigEndian::read_u32(fields.get(..4)?);

        if flags & XING_REQUIRED != XING_REQUIRED {
            return None;
        }

        let frame_count = u64::from(BigEndian::read_u32(fields.get(4..8)?));
        let byte_count = u64::from(BigEndian::read_u32(fields.get(8..12)?));
        let toc = fields.get(12..12 + TOC_LEN)?.to_vec();

        let available = content_length.map_or(byte_count, |len| len.saturating_sub(data_start));

        Some(Self {
            data_start,
            data_len: byte_count.min(available),
            frame_count,
            samples_per_frame: header.samples_per_frame(),
            sample_rate: header.sample_rate,
            toc,
        })
    }

    fn duration_ms(&self) -> u64 {
        samples_to_ms(
            self.frame_count * u64::from(self.samples_per_frame),
            u64::from(self.sample_rate),
        )
    }

    fn seek(&self, timecode: u64) -> (u64, u64) {
        let duration = self.duration_ms().max(1);
        let percentile = (timecode * 100 / duration).min(TOC_LEN as u64 - 1);

        let frame = self.frame_count * percentile / 100;
        let offset = u64::from(self.toc[percentile as usize]) * self.data_len / 256;

        (self.data_start + offset, frame)
    }
}

/// Seeking by an average frame length, for streams without a Xing header.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantRateSeeker {
    data_start: u64,
    frame_len: f64,
    frame_count: u64,
    samples_per_frame: u32,
    sample_rate: u32,
}

impl ConstantRateSeeker {
    /// Estimates frame count from the first frame's bitrate and the length of the stream.
    #[must_use]
    pub fn new(header: &FrameHeader, data_start: u64, content_length: u64) -> Self {
        let frame_len = header.average_frame_len();
        let data_len = content_length.saturating_sub(data_start);

        Self {
            data_start,
            frame_len,
            frame_count: (data_len as f64 / frame_len) as u64,
            samples_per_frame: header.samples_per_frame(),
            sample_rate: header.sample_rate,
        }
    }

    fn duration_ms(&self) -> u64 {
        samples_to_ms(
            self.frame_count * u64::from(self.samples_per_frame),
            u64::from(self.sample_rate),
        )
    }

    fn seek(&self, timecode: u64) -> (u64, u64) {
        let frame = (u128::from(timecode) * u128::from(self.sample_rate)
            / (u128::from(self.samples_per_frame) * 1000)) as u64;
        let frame = frame.min(self.frame_count.saturating_sub(1));

        (self.data_start + (frame as f64 * self.frame_len) as u64, frame)
    }
}

/// How an MP3 stream maps timecodes to byte offsets.
#[derive(Clone, Debug, PartialEq)]
pub enum Mp3Seeker {
    /// A Xing/Info header provides a percentile table.
    Xing(XingSeeker),
    /// Frames are assumed to share the first frame's bitrate.
    ConstantRate(ConstantRateSeeker),
    /// The stream's length is unknown: it has no duration, and cannot seek.
    Stream,
}

impl Mp3Seeker {
    /// Length of the stream, if known.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Xing(xing) => Some(xing.duration_ms()),
            Self::ConstantRate(cbr) => Some(cbr.duration_ms()),
            Self::Stream => None,
        }
    }

    /// Whether [`seek`] can locate timecodes.
    ///
    /// [`seek`]: Self::seek
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        !matches!(self, Self::Stream)
    }

    /// Finds the byte offset from which to scan for the frame at `timecode`,
    /// returning that offset and the index of the frame expected there.
    #[must_use]
    pub fn seek(&self, timecode: u64) -> Option<(u64, u64)> {
        match self {
            Self::Xing(xing) => Some(xing.seek(timecode)),
            Self::ConstantRate(cbr) => Some(cbr.seek(timecode)),
            Self::Stream => None,
        }
    }
}
