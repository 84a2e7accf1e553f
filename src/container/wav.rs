//! RIFF WAVE files holding integer PCM.

use super::{
    util::{check_next_bytes, ms_to_samples, samples_to_ms},
    ContainerProbe,
    Hints,
    ProbeMatch,
};
use crate::{
    constants::signatures,
    error::{DemuxError, Result},
    input::{
        metadata::{AudioReference, TrackInfo, TrackInfoBuilder},
        SeekableStream,
    },
    tracks::{AudioFormat, FrameProvider, Packet, PacketSink},
    Config,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use tracing::trace;

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Header fields needed to read interleaved PCM from the `data` chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WavHeader {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Width of each sample, in bits (8, 16, 24, or 32).
    pub bits_per_sample: u16,
    /// Size of one frame (all channels), in bytes.
    pub block_align: u16,
    /// Offset of the first sample in the file.
    pub data_start: u64,
    /// Length of the `data` chunk, if it is known.
    pub data_len: Option<u64>,
}

impl WavHeader {
    /// Read the RIFF header, `fmt ` chunk, and the header of the `data` chunk.
    ///
    /// The stream is left positioned at the first sample.
    pub fn read(stream: &mut dyn SeekableStream) -> Result<Self> {
        if !check_next_bytes(stream, signatures::WAV)? {
            return Err(DemuxError::malformed("missing RIFF/WAVE signature"));
        }

        let mut format = None;

        loop {
            let mut id = [0u8; 4];
            stream.read_exact(&mut id)?;
            let size = u64::from(stream.read_u32::<LittleEndian>()?);
            let start = stream.position();

            trace!("WAV chunk {:?}, {} bytes.", String::from_utf8_lossy(&id), size);

            match &id {
                b"fmt " => format = Some(read_format(stream, size)?),
                b"data" => {
                    let (channels, sample_rate, bits_per_sample, block_align) =
                        format.ok_or_else(|| DemuxError::malformed("data chunk before fmt"))?;

                    let data_len = if size == u64::from(u32::MAX) {
                        stream.remaining()
                    } else {
                        Some(stream.remaining().map_or(size, |left| left.min(size)))
                    };

                    return Ok(Self {
                        channels,
                        sample_rate,
                        bits_per_sample,
                        block_align,
                        data_start: start,
                        data_len,
                    });
                },
                _ => {},
            }

            // Chunks are padded to an even length.
            stream.seek(start + size + (size & 1))?;
        }
    }

    /// Number of whole frames in the `data` chunk, if known.
    #[must_use]
    pub fn frame_count(&self) -> Option<u64> {
        self.data_len.map(|len| len / u64::from(self.block_align))
    }

    /// Duration of the file, in milliseconds.
    #[must_use]
    pub fn length_ms(&self) -> Option<u64> {
        self.frame_count()
            .map(|frames| samples_to_ms(frames, u64::from(self.sample_rate)))
    }
}

fn read_format(stream: &mut dyn SeekableStream, size: u64) -> Result<(u16, u32, u16, u16)> {
    if size < 16 {
        return Err(DemuxError::malformed("fmt chunk too short"));
    }

    let mut tag = stream.read_u16::<LittleEndian>()?;
    let channels = stream.read_u16::<LittleEndian>()?;
    let sample_rate = stream.read_u32::<LittleEndian>()?;
    let _byte_rate = stream.read_u32::<LittleEndian>()?;
    let block_align = stream.read_u16::<LittleEndian>()?;
    let bits_per_sample = stream.read_u16::<LittleEndian>()?;

    if tag == FORMAT_EXTENSIBLE && size >= 40 {
        let _extra_len = stream.read_u16::<LittleEndian>()?;
        let _valid_bits = stream.read_u16::<LittleEndian>()?;
        let _channel_mask = stream.read_u32::<LittleEndian>()?;
        // First two bytes of the subformat GUID hold the underlying format tag.
        tag = stream.read_u16::<LittleEndian>()?;
    }

    if tag != FORMAT_PCM {
        return Err(DemuxError::Unsupported(format!(
            "WAV format tag {:#06x} is not integer PCM",
            tag
        )));
    }

    if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(DemuxError::Unsupported(format!(
            "{}-bit PCM is not supported",
            bits_per_sample
        )));
    }

    let min_align = u32::from(channels) * u32::from(bits_per_sample / 8);
    if channels == 0 || sample_rate == 0 || u32::from(block_align) < min_align {
        return Err(DemuxError::malformed("invalid PCM layout in fmt chunk"));
    }

    Ok((channels, sample_rate, bits_per_sample, block_align))
}

/// Detection support for WAV files.
#[derive(Clone, Copy, Debug, Default)]
pub struct WavProbe;

impl ContainerProbe for WavProbe {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/wav", "audio/x-wav", "audio/wave"], &["wav", "wave"])
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        _config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        if !check_next_bytes(stream, signatures::WAV)? {
            return Ok(None);
        }

        stream.seek(0)?;

        let header = match WavHeader::read(stream) {
            Ok(header) => header,
            Err(DemuxError::Unsupported(reason)) => {
                return Ok(Some(ProbeMatch::Unsupported(reason)));
            },
            Err(e) => return Err(e),
        };

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        builder.set_length_ms(header.length_ms());

        Ok(Some(ProbeMatch::supported(builder.build())))
    }

    fn create_provider(
        &self,
        _settings: &str,
        _track_info: &TrackInfo,
        mut stream: Box<dyn SeekableStream>,
        config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        let header = WavHeader::read(&mut *stream)?;
        Ok(Box::new(WavProvider::new(stream, header, config)))
    }
}

/// Reads interleaved PCM from the `data` chunk, converting every sample to 16 bits.
pub struct WavProvider {
    stream: Box<dyn SeekableStream>,
    header: WavHeader,
    format: AudioFormat,
    frames_per_packet: usize,
    frame: u64,
    buf: Vec<u8>,
}

impl WavProvider {
    /// Create a provider over a stream positioned at the first sample.
    #[must_use]
    pub fn new(stream: Box<dyn SeekableStream>, header: WavHeader, config: &Config) -> Self {
        Self {
            stream,
            format: AudioFormat::pcm(header.sample_rate, header.channels),
            header,
            frames_per_packet: config.pcm_frames_per_packet,
            frame: 0,
            buf: Vec::new(),
        }
    }

    fn frames_left(&self) -> Option<u64> {
        self.header
            .frame_count()
            .map(|total| total.saturating_sub(self.frame))
    }

    /// Reads as many whole frames as possible into `self.buf`, returning the frame count.
    fn fill(&mut self) -> Result<usize> {
        let mut frames = self.frames_per_packet;
        if let Some(left) = self.frames_left() {
            frames = frames.min(left as usize);
        }

        let align = usize::from(self.header.block_align);
        self.buf.resize(frames * align, 0);

        let mut filled = 0;
        while filled < self.buf.len() {
            let read = self.stream.read(&mut self.buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        Ok(filled / align)
    }

    fn convert(&self, frames: usize) -> Vec<i16> {
        let channels = usize::from(self.header.channels);
        let align = usize::from(self.header.block_align);
        let width = usize::from(self.header.bits_per_sample / 8);

        let mut out = Vec::with_capacity(frames * channels);

        for frame in self.buf[..frames * align].chunks_exact(align) {
            for sample in frame.chunks_exact(width).take(channels) {
                out.push(to_i16(sample));
            }
        }

        out
    }
}

/// Converts one little-endian sample to 16 bits, keeping its most significant bits.
fn to_i16(sample: &[u8]) -> i16 {
    match sample.len() {
        1 => (i16::from(sample[0]) - 128) << 8,
        2 => i16::from_le_bytes([sample[0], sample[1]]),
        3 => i16::from_le_bytes([sample[1], sample[2]]),
        _ => i16::from_le_bytes([sample[2], sample[3]]),
    }
}

impl FrameProvider for WavProvider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        loop {
            let frames = self.fill()?;
            if frames == 0 {
                return Ok(());
            }

            let timecode = samples_to_ms(self.frame, u64::from(self.header.sample_rate));
            let samples = self.convert(frames);
            self.frame += frames as u64;

            sink.push(Packet::pcm(timecode, samples))?;
        }
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        let rate = u64::from(self.header.sample_rate);
        let mut frame = ms_to_samples(timecode, rate);

        if let Some(total) = self.header.frame_count() {
            frame = frame.min(total);
        }

        let offset = self.header.data_start + frame * u64::from(self.header.block_align);
        self.stream.seek(offset)?;
        self.frame = frame;

        Ok(samples_to_ms(frame, rate))
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
        let reference = AudioReference::new("test.wav", None);

        WavProbe
            .probe(&reference, &mut *stream, &Config::default())
            .unwrap()
    }

    #[test]
    fn length_from_data_chunk() {
        let wav = test_utils::wav_pcm16(44_100, 2, 44_100 * 3);

        match probe(wav) {
            Some(ProbeMatch::Supported { track_info, .. }) => {
                assert_eq!(track_info.length_ms(), Some(3000));
                assert_eq!(track_info.identifier, "test.wav");
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn compressed_formats_are_unsupported() {
        // A-law
        let wav = test_utils::wav(6, 1, 8000, 8, &[0u8; 64]);

        assert!(matches!(probe(wav), Some(ProbeMatch::Unsupported(_))));
    }

    #[test]
    fn other_riff_is_no_match() {
        let mut avi = test_utils::wav_pcm16(8000, 1, 8);
        avi[8..12].copy_from_slice(b"AVI ");

        assert!(probe(avi).is_none());
    }

    #[test]
    fn samples_are_widened_or_narrowed_to_16_bits() {
        let cfg = Config::default();

        let eight = test_utils::wav(1, 1, 8000, 8, &[0, 128, 255]);
        let mut stream = memory(eight);
        let header = WavHeader::read(&mut *stream).unwrap();
        let mut provider = WavProvider::new(stream, header, &cfg);
        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packets[0].data, PacketData::Pcm(vec![-32768, 0, 127 << 8]));

        let data = [0x11, 0x22, 0x33, 0xFF, 0x00, 0x80];
        let twenty_four = test_utils::wav(1, 2, 8000, 24, &data);
        let mut stream = memory(twenty_four);
        let header = WavHeader::read(&mut *stream).unwrap();
        let mut provider = WavProvider::new(stream, header, &cfg);
        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packets[0].data, PacketData::Pcm(vec![0x3322, -0x8000]));
    }

    #[test]
    fn packets_and_seeking() {
        let cfg = Config::default().pcm_frames_per_packet(100);
        let mut stream = memory(test_utils::wav_pcm16(1000, 2, 250));
        let header = WavHeader::read(&mut *stream).unwrap();
        let mut provider = WavProvider::new(stream, header, &cfg);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        let timecodes: Vec<_> = packets.iter().map(|p| p.timecode).collect();
        assert_eq!(timecodes, vec![0, 100, 200]);
        assert_eq!(packets[2].len(), 100);

        assert_eq!(provider.seek_to_timecode(150).unwrap(), 150);
        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packets[0].timecode, 150);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 200);
    }
}
