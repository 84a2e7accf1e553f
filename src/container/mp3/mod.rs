//! MPEG-1/2/2.5 Layer III streams, with optional ID3v2 tags.
//!
//! MP3 has no container as such: frames are found by their sync pattern.
//! Seeking uses a Xing/Info header where one is present, an estimate from
//! the first frame's bitrate where the stream length is known, and is
//! otherwise impossible.

mod frame;
mod id3;
mod seeker;

pub use self::{
    frame::{find_frame, FrameHeader, MpegVersion},
    id3::Id3Tag,
    seeker::{is_tag_frame, ConstantRateSeeker, Mp3Seeker, XingSeeker},
};

use self::frame::HEADER_LEN;
pub(crate) use self::id3::read_leading_tag;
use super::{
    util::{read_vec, samples_to_ms},
    ContainerProbe,
    Hints,
    ProbeMatch,
};
use crate::{
    error::{DemuxError, Result},
    input::{
        metadata::{AudioReference, TrackInfo, TrackInfoBuilder},
        SeekableStream,
    },
    tracks::{AudioFormat, Codec, FrameProvider, Packet, PacketSink},
    Config,
};
use tracing::{debug, warn};

/// Everything read from the start of an MP3 stream, up to and including its first frame.
#[derive(Clone, Debug)]
pub struct Mp3Header {
    /// Leading ID3v2 tag, if any.
    pub id3: Option<Id3Tag>,
    /// Header of the first frame.
    pub first_frame: FrameHeader,
    /// Offset of the first frame.
    pub first_frame_offset: u64,
    /// Seeking strategy for the stream.
    pub seeker: Mp3Seeker,
    /// Contents of the first frame, if it holds audio rather than a Xing/Info/LAME tag.
    pub pending_frame: Option<Vec<u8>>,
}

impl Mp3Header {
    /// Reads any ID3 tag and the first frame, which must begin within `config.frame_scan_distance`.
    ///
    /// Returns `Ok(None)` if no frame is found. The stream is left after the first frame.
    pub fn read(stream: &mut dyn SeekableStream, config: &Config) -> Result<Option<Self>> {
        let (id3, seed) = read_leading_tag(stream)?;

        let (offset, header) = match find_frame(stream, &seed, config.frame_scan_distance)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let mut frame = header.raw.to_vec();
        frame.extend(read_vec(stream, (header.frame_len() - HEADER_LEN) as u64)?);

        let content_length = stream.content_length();
        let after_first = offset + frame.len() as u64;

        let (seeker, pending_frame) = if is_tag_frame(&header, &frame) {
            let seeker = match XingSeeker::from_frame(&header, &frame, after_first, content_length)
            {
                Some(xing) => Mp3Seeker::Xing(xing),
                None => fallback_seeker(&header, after_first, content_length),
            };
            (seeker, None)
        } else {
            (fallback_seeker(&header, offset, content_length), Some(frame))
        };

        debug!(
            "MP3 stream: {:?} at {}, seeker {:?}.",
            header,
            offset,
            match &seeker {
                Mp3Seeker::Xing(_) => "xing",
                Mp3Seeker::ConstantRate(_) => "cbr",
                Mp3Seeker::Stream => "stream",
            }
        );

        Ok(Some(Self {
            id3,
            first_frame: header,
            first_frame_offset: offset,
            seeker,
            pending_frame,
        }))
    }
}

fn fallback_seeker(
    header: &FrameHeader,
    data_start: u64,
    content_length: Option<u64>,
) -> Mp3Seeker {
    match content_length {
        Some(len) => Mp3Seeker::ConstantRate(ConstantRateSeeker::new(header, data_start, len)),
        None => Mp3Seeker::Stream,
    }
}

/// Detection support for MP3 streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mp3Probe;

impl ContainerProbe for Mp3Probe {
    fn name(&self) -> &'static str {
        "mp3"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/mpeg", "audio/mp3", "audio/mpeg3", "audio/x-mpeg"], &["mp3"])
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        let header = match Mp3Header::read(stream, config)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        if let Some(id3) = &header.id3 {
            builder.apply(id3);
        }

        let length = header.seeker.duration_ms();
        builder.set_length_ms(length).set_is_stream(length.is_none());

        Ok(Some(ProbeMatch::supported(builder.build())))
    }

    fn create_provider(
        &self,
        _settings: &str,
        _track_info: &TrackInfo,
        mut stream: Box<dyn SeekableStream>,
        config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        let header = Mp3Header::read(&mut *stream, config)?
            .ok_or_else(|| DemuxError::malformed("no MPEG audio frame found"))?;

        Ok(Box::new(Mp3Provider::new(stream, header, config)))
    }
}

/// Yields whole MPEG audio frames, headers included.
pub struct Mp3Provider {
    stream: Box<dyn SeekableStream>,
    seeker: Mp3Seeker,
    format: AudioFormat,
    samples_per_frame: u32,
    pending: Option<Vec<u8>>,
    frame_index: u64,
    scan_distance: usize,
}

impl Mp3Provider {
    /// Create a provider over a stream positioned after the frame described by `header`.
    #[must_use]
    pub fn new(stream: Box<dyn SeekableStream>, header: Mp3Header, config: &Config) -> Self {
        let first = header.first_frame;

        Self {
            stream,
            seeker: header.seeker,
            format: AudioFormat::new(Codec::Mp3, first.sample_rate, first.channels),
            samples_per_frame: first.samples_per_frame(),
            pending: header.pending_frame,
            frame_index: 0,
            scan_distance: config.frame_scan_distance,
        }
    }

    fn timecode(&self, frame_index: u64) -> u64 {
        samples_to_ms(
            frame_index * u64::from(self.samples_per_frame),
            u64::from(self.format.sample_rate),
        )
    }
}

impl FrameProvider for Mp3Provider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        self.seeker.is_seekable() && self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        if let Some(frame) = self.pending.take() {
            sink.push(Packet::encoded(self.timecode(self.frame_index), frame))?;
            self.frame_index += 1;
        }

        loop {
            let header = match find_frame(&mut *self.stream, &[], self.scan_distance)? {
                Some((_, header)) => header,
                None => return Ok(()),
            };

            let mut frame = Vec::with_capacity(header.frame_len());
            frame.extend_from_slice(&header.raw);

            match read_vec(&mut *self.stream, (header.frame_len() - HEADER_LEN) as u64) {
                Ok(body) => frame.extend(body),
                Err(e) if e.is_eof() => {
                    warn!("MP3 stream ended mid-frame.");
                    return Ok(());
                },
                Err(e) => return Err(e),
            }

            sink.push(Packet::encoded(self.timecode(self.frame_index), frame))?;
            self.frame_index += 1;
        }
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        if !self.is_seekable() {
            return Err(DemuxError::Unseekable);
        }

        let (offset, frame_index) = self.seeker.seek(timecode).ok_or(DemuxError::Unseekable)?;

        self.stream.seek(offset)?;
        self.pending = None;
        self.frame_index = frame_index;

        Ok(self.timecode(frame_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, test_utils, tracks::PacketData};
    use std::io::Cursor;
    use symphonia_core::io::ReadOnlySource;

    fn memory(bytes: Vec<u8>) -> Box<dyn SeekableStream> {
        Box::new(SourceStream::from_memory(bytes, &Config::default()))
    }

    fn frames(count: u8) -> Vec<u8> {
        (0..count).flat_map(test_utils::mp3_frame).collect()
    }

    fn probe(bytes: Vec<u8>) -> Option<ProbeMatch> {
        let mut stream = memory(bytes);
        Mp3Probe
            .probe(&AudioReference::new("x.mp3", None), &mut *stream, &Config::default())
            .unwrap()
    }

    fn provider(bytes: Vec<u8>) -> Box<dyn FrameProvider> {
        let track_info = TrackInfoBuilder::new().build();
        Mp3Probe
            .create_provider("", &track_info, memory(bytes), &Config::default())
            .unwrap()
    }

    fn fills(packets: &[Packet]) -> Vec<(u64, u8)> {
        packets
            .iter()
            .map(|p| match &p.data {
                PacketData::Encoded(frame) => (p.timecode, frame[HEADER_LEN]),
                PacketData::Pcm(_) => panic!("expected encoded frames"),
            })
            .collect()
    }

    #[test]
    fn id3_tags_and_constant_rate_length() {
        let mut bytes = test_utils::id3v2(3, &[
            (&b"TIT2"[..], test_utils::id3_text(1, "Sync Song")),
            (&b"TPE1"[..], test_utils::id3_text(3, "Sync Band")),
        ]);
        bytes.extend(frames(10));

        match probe(bytes) {
            Some(ProbeMatch::Supported { track_info, .. }) => {
                assert_eq!(track_info.title, "Sync Song");
                assert_eq!(track_info.author, "Sync Band");
                assert_eq!(track_info.length_ms(), Some(240));
                assert!(!track_info.is_stream);
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn frames_after_leading_junk() {
        let mut bytes = vec![0x42; 300];
        bytes.extend(frames(3));

        assert!(probe(bytes.clone()).is_some());

        let mut provider = provider(bytes);
        assert_eq!(provider.format().sample_rate, 48_000);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(fills(&packets), vec![(0, 0), (24, 1), (48, 2)]);
        assert!(packets.iter().all(|p| p.len() == 384));
    }

    #[test]
    fn not_mp3() {
        assert!(probe(vec![0x42; 2000]).is_none());
        assert!(probe(b"#EXTM3U\nhttp://example.com/a.mp3\n".to_vec()).is_none());
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn constant_rate_seek() {
        let mut provider = provider(frames(10));
        assert!(provider.is_seekable());

        assert_eq!(provider.seek_to_timecode(100).unwrap(), 96);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(fills(&packets)[..2], [(96, 4), (120, 5)]);
        assert_eq!(packets.len(), 6);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn xing_frame_is_skipped_and_used_for_length() {
        let toc: Vec<u8> = (0..100u32).map(|i| (i * 256 / 100) as u8).collect();
        let mut bytes = test_utils::mp3_xing_frame(b"Xing", 50, 384 * 50, &toc);
        bytes.extend(frames(50));

        match probe(bytes.clone()) {
            Some(ProbeMatch::Supported { track_info, .. }) => {
                assert_eq!(track_info.length_ms(), Some(1200));
            },
            other => panic!("unexpected result {:?}", other),
        }

        let mut provider = provider(bytes);
        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packets.len(), 50);
        assert_eq!(fills(&packets)[0], (0, 0));
    }

    fn live(bytes: Vec<u8>) -> Box<dyn SeekableStream> {
        let source = ReadOnlySource::new(Cursor::new(bytes));
        Box::new(SourceStream::new(source, &Config::default()))
    }

    #[test]
    fn unknown_length_is_a_stream() {
        let mut stream = live(frames(4));

        match Mp3Probe
            .probe(&AudioReference::new("live", None), &mut *stream, &Config::default())
            .unwrap()
        {
            Some(ProbeMatch::Supported { track_info, .. }) => {
                assert!(track_info.is_stream);
                assert_eq!(track_info.length, None);
            },
            other => panic!("unexpected result {:?}", other),
        }

        let track_info = TrackInfoBuilder::new().build();
        let mut provider = Mp3Probe
            .create_provider("", &track_info, live(frames(4)), &Config::default())
            .unwrap();

        assert!(!provider.is_seekable());
        assert!(matches!(
            provider.seek_to_timecode(10),
            Err(DemuxError::Unseekable)
        ));
    }
}
