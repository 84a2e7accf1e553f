//! Raw AAC in ADTS framing, as served by many internet radio stations.
//!
//! ADTS has no seek index or length: it is always treated as an endless stream.

use super::{
    mp3::read_leading_tag,
    util::{read_vec, samples_to_ms},
    ContainerProbe,
    Hints,
    ProbeMatch,
};
use crate::{
    error::{DemuxError, Result},
    input::{
        bits::BitBufferReader,
        metadata::{AudioReference, TrackInfo, TrackInfoBuilder},
        SeekableStream,
    },
    tracks::{AudioFormat, Codec, FrameProvider, Packet, PacketSink},
    Config,
};
use byteorder::ReadBytesExt;
use std::io::ErrorKind as IoErrorKind;
use tracing::{debug, trace, warn};

/// Length of an ADTS header without its CRC.
pub const HEADER_LEN: usize = 7;
const CRC_LEN: usize = 2;
const SYNC: u32 = 0xFFF;
const SAMPLES_PER_BLOCK: u64 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Index of `rate` in the MPEG-4 sampling frequency table.
pub(crate) fn sample_rate_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|&known| known == rate)
        .map(|i| i as u8)
}

/// Builds a two-byte `AudioSpecificConfig`.
pub(crate) fn audio_specific_config(object_type: u8, rate_index: u8, channels: u8) -> Vec<u8> {
    let config = (u16::from(object_type) << 11)
        | (u16::from(rate_index & 0x0F) << 7)
        | (u16::from(channels & 0x0F) << 3);

    config.to_be_bytes().to_vec()
}

/// A parsed ADTS frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (profile + 1).
    pub object_type: u8,
    /// Index into the sampling frequency table.
    pub rate_index: u8,
    /// Channel configuration.
    pub channels: u8,
    /// Length of the whole frame, including the header.
    pub frame_len: usize,
    /// Whether a CRC follows the header.
    pub protected: bool,
    /// Number of raw data blocks in the frame.
    pub blocks: u8,
}

impl AdtsHeader {
    /// Parses a header, returning `None` if `bytes` do not form a valid one.
    #[must_use]
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Option<Self> {
        Self::read(&mut BitBufferReader::new(&bytes[..]))
            .ok()
            .flatten()
    }

    fn read(bits: &mut BitBufferReader<'_>) -> Result<Option<Self>> {
        if bits.as_integer(12)? != SYNC {
            return Ok(None);
        }

        let _mpeg_version = bits.as_integer(1)?;
        if bits.as_integer(2)? != 0 {
            return Ok(None);
        }

        let protected = bits.as_integer(1)? == 0;
        let profile = bits.as_integer(2)? as u8;
        let rate_index = bits.as_integer(4)? as u8;
        let _private = bits.as_integer(1)?;
        let channels = bits.as_integer(3)? as u8;
        // Original, home, and two copyright bits.
        bits.as_integer(4)?;
        let frame_len = bits.as_integer(13)? as usize;
        let _buffer_fullness = bits.as_integer(11)?;
        let blocks = bits.as_integer(2)? as u8 + 1;

        let header = Self {
            object_type: profile + 1,
            rate_index,
            channels,
            frame_len,
            protected,
            blocks,
        };

        if usize::from(rate_index) >= SAMPLE_RATES.len() || frame_len < header.header_len() {
            return Ok(None);
        }

        Ok(Some(header))
    }

    /// Length of the header, including any CRC.
    #[must_use]
    pub fn header_len(&self) -> usize {
        if self.protected {
            HEADER_LEN + CRC_LEN
        } else {
            HEADER_LEN
        }
    }

    /// Sample rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[usize::from(self.rate_index)]
    }

    /// Decoder configuration describing this stream.
    #[must_use]
    pub fn decoder_config(&self) -> Vec<u8> {
        audio_specific_config(self.object_type, self.rate_index, self.channels)
    }
}

/// Searches for a valid header within `distance` bytes, scanning `seed` first.
///
/// On success, the stream is positioned just after the fixed header.
fn find_header(
    stream: &mut dyn SeekableStream,
    seed: &[u8],
    distance: usize,
) -> Result<Option<AdtsHeader>> {
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

        if filled >= HEADER_LEN {
            if let Some(header) = AdtsHeader::parse(window) {
                trace!("ADTS frame at {}: {:?}.", stream.position(), header);
                return Ok(Some(header));
            }
        }
    }

    Ok(None)
}

/// Finds the first frame after any ID3 tag.
fn find_first_header(
    stream: &mut dyn SeekableStream,
    config: &Config,
) -> Result<Option<AdtsHeader>> {
    let (_, seed) = read_leading_tag(stream)?;
    find_header(stream, &seed, config.frame_scan_distance)
}

/// Detection support for ADTS streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdtsProbe;

impl ContainerProbe for AdtsProbe {
    fn name(&self) -> &'static str {
        "adts"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/aac", "audio/aacp", "audio/x-aac"], &["aac"])
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        let header = match find_first_header(stream, config)? {
            Some(header) => header,
            None => return Ok(None),
        };

        // The next frame must follow directly, unless the stream ends.
        match stream.skip_fully((header.frame_len - HEADER_LEN) as u64) {
            Ok(()) => {
                let mut next = [0u8; HEADER_LEN];
                match stream.read_exact(&mut next) {
                    Ok(()) => match AdtsHeader::parse(next) {
                        Some(next) if next.rate_index == header.rate_index => {},
                        _ => return Ok(None),
                    },
                    Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {},
                    Err(e) => return Err(e.into()),
                }
            },
            Err(e) if e.is_eof() => {},
            Err(e) => return Err(e),
        }

        debug!(
            "ADTS stream: object type {}, {}Hz, {} channels.",
            header.object_type,
            header.sample_rate(),
            header.channels,
        );

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        builder.set_is_stream(true);

        Ok(Some(ProbeMatch::supported(builder.build())))
    }

    fn create_provider(
        &self,
        _settings: &str,
        _track_info: &TrackInfo,
        mut stream: Box<dyn SeekableStream>,
        config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        let header = find_first_header(&mut *stream, config)?
            .ok_or_else(|| DemuxError::malformed("no ADTS frame found"))?;

        Ok(Box::new(AdtsProvider::new(stream, header, config)))
    }
}

/// Yields the raw AAC payload of each ADTS frame.
pub struct AdtsProvider {
    stream: Box<dyn SeekableStream>,
    format: AudioFormat,
    next: Option<AdtsHeader>,
    samples: u64,
    scan_distance: usize,
}

impl AdtsProvider {
    /// Create a provider over a stream positioned after the fixed part of `first`.
    #[must_use]
    pub fn new(stream: Box<dyn SeekableStream>, first: AdtsHeader, config: &Config) -> Self {
        let codec = Codec::Aac {
            decoder_config: first.decoder_config(),
        };

        Self {
            stream,
            format: AudioFormat::new(codec, first.sample_rate(), u16::from(first.channels)),
            next: Some(first),
            samples: 0,
            scan_distance: config.frame_scan_distance,
        }
    }
}

impl FrameProvider for AdtsProvider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        loop {
            let header = match self.next.take() {
                Some(header) => header,
                None => match find_header(&mut *self.stream, &[], self.scan_distance)? {
                    Some(header) => header,
                    None => return Ok(()),
                },
            };

            let body = (header.frame_len - HEADER_LEN) as u64;
            let payload = match read_vec(&mut *self.stream, body) {
                Ok(mut payload) => {
                    if header.protected {
                        payload.drain(..CRC_LEN);
                    }
                    payload
                },
                Err(e) if e.is_eof() => {
                    warn!("ADTS stream ended mid-frame.");
                    return Ok(());
                },
                Err(e) => return Err(e),
            };

            let timecode = samples_to_ms(self.samples, u64::from(header.sample_rate()));
            sink.push(Packet::encoded(timecode, payload))?;

            self.samples += SAMPLES_PER_BLOCK * u64::from(header.blocks);
        }
    }

    fn seek_to_timecode(&mut self, _timecode: u64) -> Result<u64> {
        Err(DemuxError::Unseekable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, test_utils, tracks::PacketData};

    fn memory(bytes: Vec<u8>) -> Box<dyn SeekableStream> {
        Box::new(SourceStream::from_memory(bytes, &Config::default()))
    }

    fn probe(bytes: Vec<u8>) -> Option<ProbeMatch> {
        let mut stream = memory(bytes);
        AdtsProbe
            .probe(&AudioReference::new("radio", None), &mut *stream, &Config::default())
            .unwrap()
    }

    fn frames(crc: bool) -> Vec<u8> {
        (0..3u8)
            .flat_map(|i| test_utils::adts_frame(4, 2, crc, &[i; 10]))
            .collect()
    }

    #[test]
    fn decoder_config_layout() {
        assert_eq!(audio_specific_config(2, 4, 2), vec![0x12, 0x10]);
        assert_eq!(sample_rate_index(44_100), Some(4));
        assert_eq!(sample_rate_index(7_350), Some(12));
        assert_eq!(sample_rate_index(44_000), None);
    }

    #[test]
    fn header_fields() {
        let frame = test_utils::adts_frame(3, 1, true, &[0; 20]);
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(&frame[..HEADER_LEN]);

        let header = AdtsHeader::parse(bytes).unwrap();
        assert_eq!(header.object_type, 2);
        assert_eq!(header.sample_rate(), 48_000);
        assert_eq!(header.channels, 1);
        assert!(header.protected);
        assert_eq!(header.header_len(), 9);
        assert_eq!(header.frame_len, frame.len());
        assert_eq!(header.blocks, 1);
    }

    #[test]
    fn detected_after_id3_as_stream() {
        let mut bytes = test_utils::id3v2(4, &[(&b"TIT2"[..], test_utils::id3_text(3, "x"))]);
        bytes.extend(frames(false));

        match probe(bytes) {
            Some(ProbeMatch::Supported { track_info, .. }) => {
                assert!(track_info.is_stream);
                assert_eq!(track_info.length, None);
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn mp3_is_not_adts() {
        let bytes: Vec<u8> = (0..3).flat_map(test_utils::mp3_frame).collect();
        assert!(probe(bytes).is_none());

        let mut broken = frames(false);
        broken.truncate(20);
        broken.extend_from_slice(&[0u8; 40]);
        assert!(probe(broken).is_none());
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn payloads_without_headers_or_crc() {
        for crc in [false, true] {
            let track_info = TrackInfoBuilder::new().build();
            let mut provider = AdtsProbe
                .create_provider("", &track_info, memory(frames(crc)), &Config::default())
                .unwrap();

            assert_eq!(provider.format().codec, Codec::Aac {
                decoder_config: vec![0x12, 0x10],
            });
            assert!(!provider.is_seekable());
            assert!(matches!(
                provider.seek_to_timecode(0),
                Err(DemuxError::Unseekable)
            ));

            let mut packets = vec![];
            provider.provide_frames(&mut packets).unwrap();

            let timecodes: Vec<_> = packets.iter().map(|p| p.timecode).collect();
            assert_eq!(timecodes, vec![0, 23, 46]);
            assert_eq!(packets[1].data, PacketData::Encoded(vec![1; 10]));
        }
    }
}
