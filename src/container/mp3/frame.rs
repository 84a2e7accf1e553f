//! MPEG audio (Layer III) frame headers, and scanning for frame sync.

use crate::{error::Result, input::SeekableStream};
use byteorder::ReadBytesExt;
use std::io::ErrorKind as IoErrorKind;
use tracing::trace;

/// Length of a frame header, in bytes.
pub const HEADER_LEN: usize = 4;

const BITRATES_V1: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATES_V2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_V1: [u32; 3] = [44_100, 48_000, 32_000];

/// Revision of the MPEG audio standard a frame conforms to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MpegVersion {
    /// MPEG-1.
    Mpeg1,
    /// MPEG-2 (low sample rates).
    Mpeg2,
    /// MPEG-2.5, an unofficial extension to even lower rates.
    Mpeg25,
}

/// A parsed Layer III frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Standard revision.
    pub version: MpegVersion,
    /// Bitrate in bits per second.
    pub bitrate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Whether a padding byte is added to this frame.
    pub padding: bool,
    /// Whether a 16-bit CRC follows the header.
    pub protected: bool,
    /// Channel count (1 or 2).
    pub channels: u16,
    /// The header as it appeared in the stream.
    pub raw: [u8; HEADER_LEN],
}

impl FrameHeader {
    /// Parses a header, returning `None` if `bytes` is not a valid Layer III frame header.
    ///
    /// Free-format bitrates are rejected, as their frame length cannot be computed.
    #[must_use]
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Option<Self> {
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };

        // Layer bits 01 are Layer III.
        if (bytes[1] >> 1) & 0x03 != 1 {
            return None;
        }

        let bitrate_index = usize::from(bytes[2] >> 4);
        let rate_index = usize::from((bytes[2] >> 2) & 0x03);

        if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
            return None;
        }

        let bitrate = match version {
            MpegVersion::Mpeg1 => BITRATES_V1[bitrate_index],
            _ => BITRATES_V2[bitrate_index],
        } * 1000;

        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES_V1[rate_index] / 2,
            MpegVersion::Mpeg25 => SAMPLE_RATES_V1[rate_index] / 4,
        };

        Some(Self {
            version,
            bitrate,
            sample_rate,
            padding: bytes[2] & 0x02 != 0,
            protected: bytes[1] & 0x01 == 0,
            channels: if bytes[3] >> 6 == 3 { 1 } else { 2 },
            raw: bytes,
        })
    }

    /// Samples per channel in each frame.
    #[must_use]
    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            _ => 576,
        }
    }

    /// Length of the whole frame, including its header.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        let slots = self.samples_per_frame() / 8 * self.bitrate / self.sample_rate;
        slots as usize + usize::from(self.padding)
    }

    /// Frame length averaged over padded and unpadded frames.
    #[must_use]
    pub fn average_frame_len(&self) -> f64 {
        f64::from(self.samples_per_frame() / 8) * f64::from(self.bitrate)
            / f64::from(self.sample_rate)
    }

    /// Offset from the frame start at which a Xing or Info tag would sit, after the side info.
    #[must_use]
    pub fn xing_offset(&self) -> usize {
        match (self.version, self.channels) {
            (MpegVersion::Mpeg1, 1) => 21,
            (MpegVersion::Mpeg1, _) => 36,
            (_, 1) => 13,
            (_, _) => 21,
        }
    }
}

/// Searches for the next valid frame header within `distance` bytes of the current position.
///
/// `seed` holds up to three bytes already read from just before the current position,
/// which are scanned first. A rolling window over the last four bytes read means that
/// no byte is read twice, even when a candidate header turns out to be invalid. On
/// success, the stream is positioned just after the header. `Ok(None)` is returned if
/// the search distance is exhausted or the stream ends.
pub fn find_frame(
    stream: &mut dyn SeekableStream,
    seed: &[u8],
    distance: usize,
) -> Result<Option<(u64, FrameHeader)>> {
    let mut window = [0u8; HEADER_LEN];
    let mut filled = 0;

    for &byte in seed.iter().take(HEADER_LEN - 1) {
        window.rotate_left(1);
        window[HEADER_LEN - 1] = byte;
        filled += 1;
    }

    for _ in filled..distance + HEADER_LEN {
        let byte = match stream.read_u8() {
            Ok(byte) => byte,
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        window.rotate_left(1);
        window[HEADER_LEN - 1] = byte;
        filled += 1;

        if filled < HEADER_LEN {
            continue;
        }

        if let Some(header) = FrameHeader::parse(window) {
            let offset = stream.position() - HEADER_LEN as u64;
            trace!("MP3 frame at {}: {:?}.", offset, header);
            return Ok(Some((offset, header)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, test_utils, Config};

    #[test]
    fn header_fields() {
        let header = FrameHeader::parse([0xFF, 0xFB, 0x90, 0x44]).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.bitrate, 128_000);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_len(), 417);
        assert_eq!(header.xing_offset(), 36);

        let padded = FrameHeader::parse([0xFF, 0xFB, 0x92, 0x44]).unwrap();
        assert_eq!(padded.frame_len(), 418);

        // MPEG-2, 64kbps, 22.05kHz, mono.
        let low = FrameHeader::parse([0xFF, 0xF3, 0x80, 0xC0]).unwrap();
        assert_eq!(low.version, MpegVersion::Mpeg2);
        assert_eq!(low.sample_rate, 22_050);
        assert_eq!(low.samples_per_frame(), 576);
        assert_eq!(low.channels, 1);
        assert_eq!(low.xing_offset(), 13);
    }

    #[test]
    fn invalid_headers() {
        // Free format.
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x00, 0x44]).is_none());
        // Reserved sample rate.
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x9C, 0x44]).is_none());
        // Layer II.
        assert!(FrameHeader::parse([0xFF, 0xFD, 0x90, 0x44]).is_none());
        // ADTS sync.
        assert!(FrameHeader::parse([0xFF, 0xF1, 0x50, 0x80]).is_none());
    }

    #[test]
    fn scan_skips_junk_and_false_syncs() {
        let mut bytes = vec![0x00, 0xFF, 0xFF, 0xFB, 0x00, 0x13];
        let junk = bytes.len() as u64;
        bytes.extend(test_utils::mp3_frame(0x11));

        let mut stream = SourceStream::from_memory(bytes, &Config::default());
        let (offset, header) = find_frame(&mut stream, &[], 100).unwrap().unwrap();

        assert_eq!(offset, junk);
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(stream.position(), junk + 4);
    }

    #[test]
    fn scan_gives_up_after_distance() {
        let mut bytes = vec![0u8; 64];
        bytes.extend(test_utils::mp3_frame(0x11));

        let mut stream = SourceStream::from_memory(bytes.clone(), &Config::default());
        assert!(find_frame(&mut stream, &[], 32).unwrap().is_none());

        let mut stream = SourceStream::from_memory(bytes, &Config::default());
        assert!(find_frame(&mut stream, &[], 64).unwrap().is_some());
    }

    #[test]
    fn seed_bytes_are_scanned_first() {
        let frame = test_utils::mp3_frame(0x11);
        let mut stream = SourceStream::from_memory(frame.clone(), &Config::default());
        stream.skip_fully(3).unwrap();

        let (offset, header) = find_frame(&mut stream, &frame[..3], 16).unwrap().unwrap();
        assert_eq!(header.raw, [0xFF, 0xFB, 0x94, 0x44]);
        assert_eq!(offset, 0);
        assert_eq!(stream.position(), 4);
    }
}
