//! Native FLAC streams, decoded to 16-bit PCM.
//!
//! FLAC's frame grammar is its codec: there is no way to find frame boundaries
//! without decoding each subframe, so this module includes a complete frame
//! decoder. The same decoder is used for FLAC-in-Ogg.

mod frame;
mod metadata;
mod subframe;

pub use self::{
    frame::{DecodedFrame, FrameDecoder, FrameHeader},
    metadata::{FlacMetadata, SeekPoint, StreamInfo},
    subframe::ChannelAssignment,
};

use super::{
    util::{check_next_bytes, ms_to_samples, samples_to_ms},
    ContainerProbe,
    Hints,
    ProbeMatch,
};
use crate::{
    constants::signatures,
    error::Result,
    input::{
        metadata::{AudioReference, TrackInfo, TrackInfoBuilder},
        SeekableStream,
    },
    tracks::{AudioFormat, FrameProvider, Packet, PacketSink},
    Config,
};
use tracing::{debug, warn};

/// Detection support for native FLAC streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlacProbe;

impl ContainerProbe for FlacProbe {
    fn name(&self) -> &'static str {
        "flac"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/flac", "audio/x-flac"], &["flac"])
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        _config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        if !check_next_bytes(stream, signatures::FLAC)? {
            return Ok(None);
        }

        stream.seek(0)?;
        let metadata = FlacMetadata::read(stream)?;

        debug!(
            "FLAC stream: {}Hz, {} channels, {} bits.",
            metadata.stream_info.sample_rate,
            metadata.stream_info.channels,
            metadata.stream_info.bits_per_sample,
        );

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        if let Some(tags) = &metadata.tags {
            builder.apply(tags);
        }
        builder.set_length_ms(metadata.stream_info.length_ms());

        Ok(Some(ProbeMatch::supported(builder.build())))
    }

    fn create_provider(
        &self,
        _settings: &str,
        _track_info: &TrackInfo,
        mut stream: Box<dyn SeekableStream>,
        _config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        let metadata = FlacMetadata::read(&mut *stream)?;
        Ok(Box::new(FlacProvider::new(stream, metadata)))
    }
}

/// Decodes frames from a native FLAC stream.
pub struct FlacProvider {
    stream: Box<dyn SeekableStream>,
    metadata: FlacMetadata,
    decoder: FrameDecoder,
    format: AudioFormat,
}

impl FlacProvider {
    /// Create a provider over a stream positioned at the first frame.
    #[must_use]
    pub fn new(stream: Box<dyn SeekableStream>, metadata: FlacMetadata) -> Self {
        let info = metadata.stream_info;

        Self {
            stream,
            decoder: FrameDecoder::new(info),
            format: AudioFormat::pcm(info.sample_rate, u16::from(info.channels)),
            metadata,
        }
    }

    fn rate(&self) -> u64 {
        u64::from(self.metadata.stream_info.sample_rate)
    }
}

impl FrameProvider for FlacProvider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        loop {
            let frame = match self.decoder.next_frame(&mut self.stream) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) if e.is_eof() => {
                    warn!("FLAC stream ended mid-frame.");
                    return Ok(());
                },
                Err(e) => return Err(e),
            };

            let timecode = samples_to_ms(frame.first_sample, self.rate());
            sink.push(Packet::pcm(timecode, frame.samples))?;
        }
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        let target = ms_to_samples(timecode, self.rate());

        let (sample, offset) = self
            .metadata
            .seek_point_for(target)
            .map_or((0, 0), |point| (point.sample_index, point.byte_offset));

        self.stream
            .seek(self.metadata.first_frame_offset + offset)?;

        Ok(samples_to_ms(sample, self.rate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::SourceStream,
        test_utils::{self, FlacInfo},
        tracks::PacketData,
    };

    fn info() -> FlacInfo {
        FlacInfo {
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
            block_size: 16,
            total_samples: 64,
        }
    }

    /// Four 16-sample frames at 8kHz (2ms each), each holding a constant value.
    fn file(with_seek_table: bool) -> (Vec<u8>, u64) {
        let frames: Vec<Vec<u8>> = (0..4)
            .map(|i| test_utils::flac_constant_frame(&info(), i, 1000 * i as i64))
            .collect();

        let mut points = vec![];
        if with_seek_table {
            let mut offset = 0;
            for (i, frame) in frames.iter().enumerate() {
                points.push((16 * i as u64, offset));
                offset += frame.len() as u64;
            }
        }

        let tags = [("TITLE", "Constant"), ("ARTIST", "Tester")];
        let mut out = test_utils::flac_header(&info(), &points, Some(&tags[..]), false);
        let first_frame = out.len() as u64;
        for frame in frames {
            out.extend(frame);
        }

        (out, first_frame)
    }

    fn provider(bytes: Vec<u8>) -> FlacProvider {
        let mut stream: Box<dyn SeekableStream> =
            Box::new(SourceStream::from_memory(bytes, &Config::default()));
        let metadata = FlacMetadata::read(&mut *stream).unwrap();
        FlacProvider::new(stream, metadata)
    }

    fn first_samples(packets: &[Packet]) -> Vec<(u64, i16)> {
        packets
            .iter()
            .map(|p| match &p.data {
                PacketData::Pcm(s) => (p.timecode, s[0]),
                PacketData::Encoded(_) => panic!("expected PCM"),
            })
            .collect()
    }

    #[test]
    fn probe_reads_tags_and_length() {
        let (bytes, _) = file(false);
        let mut stream = SourceStream::from_memory(bytes, &Config::default());

        let found = FlacProbe
            .probe(&AudioReference::new("x.flac", None), &mut stream, &Config::default())
            .unwrap();

        match found {
            Some(ProbeMatch::Supported { track_info, .. }) => {
                assert_eq!(track_info.title, "Constant");
                assert_eq!(track_info.author, "Tester");
                assert_eq!(track_info.length_ms(), Some(8));
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn decodes_all_frames() {
        let (bytes, _) = file(false);
        let mut provider = provider(bytes);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();

        assert_eq!(first_samples(&packets), vec![
            (0, 0),
            (2, 1000),
            (4, 2000),
            (6, 3000)
        ]);
        assert!(packets.iter().all(|p| p.len() == 16));
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn seeks_via_seek_table() {
        let (bytes, _) = file(true);
        let mut provider = provider(bytes);

        assert_eq!(provider.seek_to_timecode(5).unwrap(), 4);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(first_samples(&packets), vec![(4, 2000), (6, 3000)]);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn seeks_to_start_without_table() {
        let (bytes, first_frame) = file(false);
        let mut provider = provider(bytes);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();

        assert_eq!(provider.seek_to_timecode(5).unwrap(), 0);
        assert_eq!(provider.stream.position(), first_frame);
    }
}
